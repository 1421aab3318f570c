use membot_rs_memory::Embedder;

/// Bag-of-letters embedding over `a..=z`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StubEmbedder;

impl Embedder for StubEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; 26];
        for ch in text.chars().filter(char::is_ascii_lowercase) {
            vector[(ch as u8 - b'a') as usize] += 1.0;
        }
        vector
    }
}
