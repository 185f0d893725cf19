fn main() {
    discipline_timer::run();
}
