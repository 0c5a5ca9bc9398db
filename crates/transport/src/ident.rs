//! Identity namespace suffixes used on the wire.
//!
//! A contact is addressable through the phone-linked namespaces; the
//! transport may also refer to the same contact through an ephemeral linked
//! namespace that must be resolved before anything business-facing touches
//! it.

/// Stable phone-linked namespaces a message can be sent to.
pub const ADDRESSABLE_SUFFIXES: &[&str] = &["@s.whatsapp.net", "@c.us"];

/// The alternate, non-phone namespace the transport may use for a contact.
pub const LINKED_SUFFIX: &str = "@lid";

/// Whether an identity is in one of the addressable namespaces.
#[must_use]
pub fn is_addressable(identity: &str) -> bool {
    ADDRESSABLE_SUFFIXES.iter().any(|s| identity.ends_with(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addressable_namespaces() {
        assert!(is_addressable("628123@s.whatsapp.net"));
        assert!(is_addressable("628123@c.us"));
        assert!(!is_addressable("999@lid"));
        assert!(!is_addressable("12345-6789@g.us"));
    }
}
