fn main() {
    stumbler_lib::run()
}
