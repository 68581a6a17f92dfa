fn main() {
    let mut features = vec!["text".to_string(), "markdown".to_string(), "html".to_string()];
    if cfg!(feature = "pdf") {
        features.push("pdf".to_string());
    }
    println!("cargo:rustc-env=CITERAG_FORMATS={}", features.join(", "));
}
