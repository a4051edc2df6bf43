//! Syntactic validation of bucket names, object keys, and part numbers.
//!
//! Validators only answer yes/no; the caller picks the S3 error code.

/// Check a bucket name against the S3 naming rules.
///
/// Length 3..=63, lowercase alphanumeric plus `.` and `-`, must start and
/// end alphanumeric, no `..` / `.-` / `-.` runs, and must not be formatted
/// as an IP address.
pub fn valid_bucket_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if !(3..=63).contains(&bytes.len()) {
        return false;
    }

    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !alnum(bytes[0]) || !alnum(bytes[bytes.len() - 1]) {
        return false;
    }
    if !bytes.iter().all(|&b| alnum(b) || b == b'.' || b == b'-') {
        return false;
    }
    if name.contains("..") || name.contains(".-") || name.contains("-.") {
        return false;
    }

    // "192.168.0.1" is a valid DNS label sequence but a forbidden bucket name.
    if name.parse::<std::net::IpAddr>().is_ok() {
        return false;
    }

    true
}

/// Check an object key. Empty keys are allowed (bucket-level operations).
///
/// Rejects NUL bytes and any `.` / `..` path segment so a key can never
/// escape its bucket directory once mapped onto the filesystem.
pub fn valid_object_key(key: &str) -> bool {
    if key.contains('\0') {
        return false;
    }
    key.split('/').all(|segment| segment != "." && segment != "..")
}

/// Parse a part number: decimal digits only, value >= 1.
///
/// `+5`, `-1`, `1.0`, and the empty string are all rejected; leading
/// zeros are accepted (`007` is part 7).
pub fn parse_part_number(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match s.parse::<u32>() {
        Ok(n) if n >= 1 => Some(n),
        _ => None,
    }
}
