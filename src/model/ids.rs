use rand::Rng;

const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ\
                        abcdefghijklmnopqrstuvwxyz\
                        0123456789";

/// Id lengths per collection.
pub fn id_length(collection: &str) -> usize {
    match collection {
        "workspace" => 16,
        _ => 10,
    }
}

/// Generate an alphanumeric id sized for `collection`.
pub fn generate_id(collection: &str) -> String {
    let mut rng = rand::thread_rng();
    (0..id_length(collection))
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}
