use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

const CURRENT_PREFIX: &str = "pbkdf2_sha256_100000_";
const CURRENT_ITERATIONS: u32 = 100_000;
const LEGACY_PREFIX: &str = "pbkdf2_sha256_10000_";
const LEGACY_ITERATIONS: u32 = 10_000;
const LEGACY_SALT: &[u8] = b"neungju-password-salt-v1";
const SIMPLE_PREFIX: &str = "hash_";

const SPECIAL_CHARS: &str = "!@#$%^&*()_+-=[]{};':\"\\|,.<>/?";
const WEAK_PATTERNS: [&str; 6] = ["12345678", "password", "qwerty", "admin", "123456", "abcdef"];

fn derive_hex(password: &str, salt: &[u8], iterations: u32) -> String {
    let mut out = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out);
    to_hex(&out)
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// `pbkdf2_sha256_100000_{salt_b64}_{hex}` with a fresh 128-bit salt.
pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; 16];
    rand::rng().fill_bytes(&mut salt);
    hash_with_salt(password, &salt)
}

/// Equality whose running time depends only on the lengths.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn hash_with_salt(password: &str, salt: &[u8]) -> String {
    format!(
        "{}{}_{}",
        CURRENT_PREFIX,
        B64.encode(salt),
        derive_hex(password, salt, CURRENT_ITERATIONS)
    )
}

/// String hash used by the oldest stored accounts.
fn simple_hash(password: &str) -> String {
    let mut hash: i32 = 0;
    let mut len = 0usize;
    for unit in password.encode_utf16() {
        hash = (hash << 5).wrapping_sub(hash).wrapping_add(unit as i32);
        len += 1;
    }
    format!("{}{}_{}", SIMPLE_PREFIX, to_base36((hash as i64).unsigned_abs()), len)
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Check a password against any stored hash format, including plaintext
/// left behind by very old installs.
pub fn verify_password(password: &str, stored: &str) -> bool {
    if let Some(rest) = stored.strip_prefix(CURRENT_PREFIX) {
        let Some((salt_b64, expected)) = rest.rsplit_once('_') else {
            return false;
        };
        let Ok(salt) = B64.decode(salt_b64) else {
            return false;
        };
        let actual = derive_hex(password, &salt, CURRENT_ITERATIONS);
        return constant_time_eq(actual.as_bytes(), expected.as_bytes());
    }
    if let Some(expected) = stored.strip_prefix(LEGACY_PREFIX) {
        let actual = derive_hex(password, LEGACY_SALT, LEGACY_ITERATIONS);
        return constant_time_eq(actual.as_bytes(), expected.as_bytes());
    }
    if stored.starts_with(SIMPLE_PREFIX)
        && constant_time_eq(simple_hash(password).as_bytes(), stored.as_bytes())
    {
        return true;
    }
    !stored.is_empty() && constant_time_eq(password.as_bytes(), stored.as_bytes())
}

pub fn needs_rehash(stored: &str) -> bool {
    !stored.starts_with(CURRENT_PREFIX)
}

pub fn validate_password_strength(password: &str) -> Result<(), &'static str> {
    if password.is_empty() {
        return Err("password is required");
    }
    let len = password.chars().count();
    if len < 8 {
        return Err("password must be at least 8 characters");
    }
    if len > 128 {
        return Err("password must be at most 128 characters");
    }
    let has_letter = password
        .chars()
        .any(|c| c.is_ascii_alphabetic() || ('가'..='힣').contains(&c));
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_special = password.chars().any(|c| SPECIAL_CHARS.contains(c));
    if [has_letter, has_digit, has_special].iter().filter(|b| **b).count() < 2 {
        return Err("password must mix at least two of letters, digits and symbols");
    }
    let lower = password.to_ascii_lowercase();
    if WEAK_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Err("password is too easy to guess");
    }
    Ok(())
}

/// Empty is allowed; the address is optional.
pub fn validate_email(email: &str) -> bool {
    if email.is_empty() {
        return true;
    }
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rfind('.') {
        Some(dot) => dot > 0 && dot + 1 < domain.len(),
        None => false,
    }
}

pub fn validate_user_name(name: &str) -> Result<String, &'static str> {
    if name.trim().is_empty() {
        return Err("name is required");
    }
    let clean = sanitize_input(name);
    let len = clean.chars().count();
    if len == 0 {
        return Err("name has no usable characters");
    }
    if len > 50 {
        return Err("name must be at most 50 characters");
    }
    Ok(clean)
}

/// Strip angle brackets, `javascript:` and inline `on…=` handlers.
pub fn sanitize_input(input: &str) -> String {
    let no_brackets: String = input.chars().filter(|c| *c != '<' && *c != '>').collect();
    let no_scheme = remove_ascii_ci(&no_brackets, "javascript:");
    remove_event_handlers(&no_scheme).trim().to_string()
}

fn remove_ascii_ci(s: &str, pat: &str) -> String {
    let bytes = s.as_bytes();
    let p = pat.as_bytes();
    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    let mut i = 0;
    while i + p.len() <= bytes.len() {
        if bytes[i..i + p.len()].eq_ignore_ascii_case(p) {
            out.push_str(&s[last..i]);
            i += p.len();
            last = i;
        } else {
            i += 1;
        }
    }
    out.push_str(&s[last..]);
    out
}

fn remove_event_handlers(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    let mut i = 0;
    while i + 2 <= bytes.len() {
        if bytes[i..i + 2].eq_ignore_ascii_case(b"on") {
            let mut j = i + 2;
            while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
                j += 1;
            }
            if j > i + 2 && j < bytes.len() && bytes[j] == b'=' {
                out.push_str(&s[last..i]);
                i = j + 1;
                last = i;
                continue;
            }
        }
        i += 1;
    }
    out.push_str(&s[last..]);
    out
}

pub fn validate_date(s: &str) -> bool {
    s.len() == 10 && crate::model::parse_date(s).is_some()
}

pub fn validate_id(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 100
        && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}
