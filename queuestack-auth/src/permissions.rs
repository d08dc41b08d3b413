//! Permission and resource-type sets carried by tokens

use bitflags::bitflags;
use std::fmt;
use std::str::FromStr;

use crate::sas::SasError;

bitflags! {
    /// Permissions a queue token or stored access policy can grant
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct QueuePermissions: u8 {
        /// Peek messages, read metadata
        const READ = 1;
        /// Put messages
        const ADD = 1 << 1;
        /// Update messages
        const UPDATE = 1 << 2;
        /// Get and delete messages
        const PROCESS = 1 << 3;
    }
}

bitflags! {
    /// Permissions an account token can grant
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccountPermissions: u8 {
        const READ = 1;
        const WRITE = 1 << 1;
        const DELETE = 1 << 2;
        const LIST = 1 << 3;
        const ADD = 1 << 4;
        const CREATE = 1 << 5;
        const UPDATE = 1 << 6;
        const PROCESS = 1 << 7;
    }
}

bitflags! {
    /// Resource levels an account token reaches
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceTypes: u8 {
        /// Service-level calls: listing queues, service properties
        const SERVICE = 1;
        /// Queue-level calls: create, delete, metadata, ACLs
        const CONTAINER = 1 << 1;
        /// Message-level calls
        const OBJECT = 1 << 2;
    }
}

// Letter order is the canonical order used when signing.
const QUEUE_LETTERS: &[(char, u8)] = &[
    ('r', QueuePermissions::READ.bits()),
    ('a', QueuePermissions::ADD.bits()),
    ('u', QueuePermissions::UPDATE.bits()),
    ('p', QueuePermissions::PROCESS.bits()),
];

const ACCOUNT_LETTERS: &[(char, u8)] = &[
    ('r', AccountPermissions::READ.bits()),
    ('w', AccountPermissions::WRITE.bits()),
    ('d', AccountPermissions::DELETE.bits()),
    ('l', AccountPermissions::LIST.bits()),
    ('a', AccountPermissions::ADD.bits()),
    ('c', AccountPermissions::CREATE.bits()),
    ('u', AccountPermissions::UPDATE.bits()),
    ('p', AccountPermissions::PROCESS.bits()),
];

const RESOURCE_LETTERS: &[(char, u8)] = &[
    ('s', ResourceTypes::SERVICE.bits()),
    ('c', ResourceTypes::CONTAINER.bits()),
    ('o', ResourceTypes::OBJECT.bits()),
];

fn encode(bits: u8, table: &[(char, u8)]) -> String {
    table
        .iter()
        .filter(|(_, bit)| bits & bit != 0)
        .map(|(letter, _)| *letter)
        .collect()
}

fn decode(s: &str, table: &[(char, u8)]) -> Result<u8, SasError> {
    s.chars().try_fold(0u8, |bits, ch| {
        table
            .iter()
            .find(|(letter, _)| *letter == ch)
            .map(|(_, bit)| bits | bit)
            .ok_or(SasError::InvalidPermission(ch))
    })
}

macro_rules! letter_codec {
    ($ty:ty, $table:expr) => {
        impl $ty {
            /// Canonical letter form, e.g. `"rp"`
            pub fn to_letters(&self) -> String {
                encode(self.bits(), $table)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_letters())
            }
        }

        impl FromStr for $ty {
            type Err = SasError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                decode(s, $table).map(Self::from_bits_truncate)
            }
        }
    };
}

letter_codec!(QueuePermissions, QUEUE_LETTERS);
letter_codec!(AccountPermissions, ACCOUNT_LETTERS);
letter_codec!(ResourceTypes, RESOURCE_LETTERS);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letters_are_canonically_ordered() {
        let perms = QueuePermissions::PROCESS | QueuePermissions::READ;
        assert_eq!(perms.to_letters(), "rp");

        let parsed: QueuePermissions = "pr".parse().unwrap();
        assert_eq!(parsed, perms);
        assert_eq!(parsed.to_string(), "rp");
    }

    #[test]
    fn test_account_permissions_share_letters_with_distinct_bits() {
        let perms: AccountPermissions = "rwdlacup".parse().unwrap();
        assert_eq!(perms, AccountPermissions::all());

        let create: AccountPermissions = "c".parse().unwrap();
        assert_eq!(create, AccountPermissions::CREATE);
    }

    #[test]
    fn test_resource_types() {
        let types: ResourceTypes = "co".parse().unwrap();
        assert!(types.contains(ResourceTypes::CONTAINER));
        assert!(!types.contains(ResourceTypes::SERVICE));
    }

    #[test]
    fn test_unknown_letter_rejected() {
        let result = "rx".parse::<QueuePermissions>();
        assert!(matches!(result, Err(SasError::InvalidPermission('x'))));

        // 'd' is an account permission, not a queue permission
        assert!("d".parse::<QueuePermissions>().is_err());
    }

    #[test]
    fn test_empty_string_is_empty_set() {
        let perms: QueuePermissions = "".parse().unwrap();
        assert!(perms.is_empty());
    }
}
