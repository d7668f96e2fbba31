//! Identifier minting for game codes and player ids

use rand::Rng;

/// The characters identifiers are built from.
pub const ID_ALPHABET: &[u8] = b"0123456789ABCDEF";

/// The length of public game codes.
pub const GAME_CODE_LENGTH: usize = 5;

/// The length of player ids.
pub const PLAYER_ID_LENGTH: usize = 6;

// Generate a random identifier of the provided length
pub fn random_id(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

/// Mints an identifier of the provided length that is free according to
/// `exists`, resampling on collision. Callers must hold a lock over the
/// domain `exists` consults so the collision check stays consistent until
/// the identifier is inserted.
pub fn mint_id(length: usize, exists: impl Fn(&str) -> bool) -> String {
    loop {
        let id = random_id(length);
        if !exists(&id) {
            return id;
        }
    }
}
