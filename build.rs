fn main() {
    // Host builds (tests, fuzzing) do not link against ESP-IDF.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
