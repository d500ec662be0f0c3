use code_chunker::{Chunker, ChunkerConfig};

fn chunk(code: &str) -> Vec<code_chunker::Chunk> {
    let chunker = Chunker::new(ChunkerConfig::default());
    chunker
        .chunk_file("nested.rs", code)
        .expect("chunking failed")
        .0
}

#[test]
fn extracts_methods_inside_module_impl() {
    let code = r"
mod api {
    pub struct Car;

    impl Car {
        pub fn drive(&self) {}
        fn stop(&self) {}
    }
}
";

    let chunks = chunk(code);
    let methods: Vec<_> = chunks
        .iter()
        .filter(|c| c.kind == "method_declaration")
        .map(|c| c.container_path.as_str())
        .collect();

    assert!(
        methods.contains(&"Car") && methods.len() == 2,
        "expected two method chunks under container Car, got: {methods:?}"
    );
}

#[test]
fn module_declaration_chunk_covers_whole_block() {
    let code = "mod api {\n    pub struct Car;\n}\n";
    let chunks = chunk(code);
    assert!(chunks.iter().any(|c| c.kind == "module_declaration"));
    assert!(chunks.iter().any(|c| c.kind == "struct_declaration"));
}
