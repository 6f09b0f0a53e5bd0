fn main() {
    hostbridge_lib::run()
}
