//! Compile time configurations for the util crate
fn main() {
    // the CROSSING_PKG_NAME variable is used to create local folders under
    // `~/.config` and other directories. Changing it means any previously
    // stored device identity will no longer be found.
    println!("cargo::rustc-env=CROSSING_PKG_NAME=crossing");
}
