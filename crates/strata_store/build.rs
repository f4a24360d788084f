use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=catalog.json");
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));
    let src = PathBuf::from("catalog.json");
    let dst = out_dir.join("catalog.json");
    let payload = fs::read_to_string(&src).expect("read catalog.json");
    fs::write(&dst, payload).expect("write catalog");
}
