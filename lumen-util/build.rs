//! Compile time configurations for the util crate
fn main() {
    // the LUMEN_PKG_NAME variable is used to create local folders under
    // `~/.local/state` and other directories. Do not change the name
    // unless you know what you are doing as this means any prior files,
    // including the firmware slots, will no longer be found by the agent.
    println!("cargo::rustc-env=LUMEN_PKG_NAME=lumen");
}
