//! Interface name validation, enforced before any string reaches a
//! subprocess argv.

const MAX_IFACE_LEN: usize = 15;

pub fn is_safe_iface(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_IFACE_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_interface_names() {
        for name in ["eth0", "wan1", "tun0", "br-lan", "ppp0.1"] {
            assert!(is_safe_iface(name), "{name} should be safe");
        }
    }

    #[test]
    fn rejects_empty() {
        assert!(!is_safe_iface(""));
    }

    #[test]
    fn rejects_over_length() {
        assert!(!is_safe_iface("this-name-is-too-long"));
    }

    #[test]
    fn rejects_whitespace_and_shell_metacharacters() {
        for name in ["eth0 eth1", "eth0;rm -rf", "eth0$(id)", "eth0`id`"] {
            assert!(!is_safe_iface(name), "{name} should be rejected");
        }
    }
}
