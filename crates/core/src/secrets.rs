/// Mask a secret value for safe display in logs.
/// Shows first 4 and last 4 chars, the rest as `****`.
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        "****".to_string()
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}****{}", head, tail)
    }
}

/// Mask a bearer token for request-level debug logs, keeping only a short prefix.
pub fn mask_token(value: &str) -> String {
    if value.is_empty() {
        return "<empty>".to_string();
    }
    let prefix: String = value.chars().take(6).collect();
    format!("{}…", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("short"), "****");
        assert_eq!(mask_secret("sk-1234567890abcdef"), "sk-1****cdef");
    }

    #[test]
    fn test_mask_secret_multibyte() {
        assert_eq!(mask_secret("密钥密钥密钥密钥密钥"), "密钥密钥****密钥密钥");
    }

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token(""), "<empty>");
        assert_eq!(mask_token("t-g1044abcdefgh"), "t-g104…");
    }
}
