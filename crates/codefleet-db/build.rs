//! Build script so embedded migrations are refreshed when the SQL changes.

fn main() {
    println!("cargo:rerun-if-changed=migrations/");
}
