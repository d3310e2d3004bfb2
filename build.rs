fn main() {
    // Host builds (tests, the loopback tool) don't link against ESP-IDF.
    #[cfg(feature = "esp32")]
    embuild::espidf::sysenv::output();
}
