use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=MULTIHASHING_LIB_DIR");

    // Only the native backend needs the prebuilt library on the link line.
    if env::var_os("CARGO_FEATURE_NATIVE").is_none() {
        return;
    }

    if let Some(dir) = env::var_os("MULTIHASHING_LIB_DIR") {
        println!("cargo:rustc-link-search=native={}", dir.to_string_lossy());
    }
}
