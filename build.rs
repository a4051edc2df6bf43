use chrono::{SecondsFormat, Utc};

fn main() {
    // Stamp the binary with its build time for --version output.
    println!(
        "cargo:rustc-env=BASALT_BUILD_TIME={}",
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
    );
}
