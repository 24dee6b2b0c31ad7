//! Deploy flags decoded from a single packed option string.
//!
//! One character per option, e.g. `shipmate push --flags afm`. Flags are
//! resolved once per run and are immutable thereafter.

use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployFlags {
    /// `a` - amend the last commit instead of creating a new one
    pub amend: bool,
    /// `b` - push to the build remote for a CI build after an origin push
    pub build: bool,
    /// `d` - generate documentation on the remote after deploy
    pub docs: bool,
    /// `f` - force-push
    pub force: bool,
    /// `l` - leave untracked files out of the commit
    pub leave_untracked: bool,
    /// `m` - skip migrations on deployment
    pub skip_migrations: bool,
    /// Unrecognized characters, reported but never fatal
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unknown: Vec<char>,
}

pub const FLAG_DESCRIPTIONS: &[(char, &str)] = &[
    ('a', "use --amend in git commit"),
    ('b', "push to the build remote for a CI build"),
    ('d', "generate documentation on deployment"),
    ('f', "force push the repository"),
    ('l', "leave untracked files out of commit"),
    ('m', "skip migrations on deployment"),
];

impl DeployFlags {
    /// Decode a packed flag string. Unknown characters are collected and
    /// logged, but recognized flags always take effect.
    pub fn parse(packed: &str) -> Self {
        let mut flags = Self::default();

        for ch in packed.chars() {
            match ch {
                'a' => flags.amend = true,
                'b' => flags.build = true,
                'd' => flags.docs = true,
                'f' => flags.force = true,
                'l' => flags.leave_untracked = true,
                'm' => flags.skip_migrations = true,
                other => {
                    log_status!("push", "No flag `{}` exists. It will not be used.", other);
                    flags.unknown.push(other);
                }
            }
        }

        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_recognized_flags() {
        let flags = DeployFlags::parse("abdflm");
        assert!(flags.amend);
        assert!(flags.build);
        assert!(flags.docs);
        assert!(flags.force);
        assert!(flags.leave_untracked);
        assert!(flags.skip_migrations);
        assert!(flags.unknown.is_empty());
    }

    #[test]
    fn unknown_characters_never_mask_recognized_flags() {
        let flags = DeployFlags::parse("xaqm");
        assert!(flags.amend);
        assert!(flags.skip_migrations);
        assert!(!flags.force);
        assert_eq!(flags.unknown, vec!['x', 'q']);
    }

    #[test]
    fn empty_string_sets_nothing() {
        let flags = DeployFlags::parse("");
        assert!(!flags.amend && !flags.build && !flags.docs);
        assert!(!flags.force && !flags.leave_untracked && !flags.skip_migrations);
    }
}
