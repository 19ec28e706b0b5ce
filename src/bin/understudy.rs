fn main() {
    understudy::cli::run();
}
