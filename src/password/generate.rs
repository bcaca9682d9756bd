use rand::Rng;
use rand::seq::SliceRandom;

use super::PasswordPolicy;

const UPPERCASE: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
const LOWERCASE: &[u8] = b"abcdefghijkmnopqrstuvwxyz";
const DIGITS: &[u8] = b"23456789";
const SPECIAL: &[u8] = b"!@#$%^&*-_=+?";

/// Random password meeting every enabled character class.
///
/// One character per required class is placed first, the rest is drawn from
/// the enabled classes, then the whole buffer is shuffled.
pub fn generate_password<R: Rng + ?Sized>(policy: &PasswordPolicy, rng: &mut R) -> String {
    let mut required: Vec<&[u8]> = Vec::new();
    if policy.require_uppercase {
        required.push(UPPERCASE);
    }
    if policy.require_lowercase {
        required.push(LOWERCASE);
    }
    if policy.require_digit {
        required.push(DIGITS);
    }
    if policy.require_special {
        required.push(SPECIAL);
    }
    let pool: Vec<u8> = if required.is_empty() {
        [UPPERCASE, LOWERCASE, DIGITS].concat()
    } else {
        required.concat()
    };

    let length = policy
        .generated_length
        .max(policy.min_length)
        .max(required.len())
        .min(policy.max_length.max(required.len()));

    let mut chars: Vec<u8> = required
        .iter()
        .filter_map(|class| class.choose(rng).copied())
        .collect();
    while chars.len() < length {
        if let Some(&c) = pool.choose(rng) {
            chars.push(c);
        }
    }
    chars.shuffle(rng);
    chars.into_iter().map(char::from).collect()
}
