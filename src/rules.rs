//! Mod-set legality seam.
//!
//! The full rules engine lives in the platform's rules library; the server
//! only needs structural answers, so the default implementation checks shape
//! (known rulesets, disjoint and duplicate-free mod sets) and leaves deeper
//! compatibility to the real library behind the same trait.

use crate::state::room::Mod;

/// Number of rulesets the platform ships.
const RULESET_COUNT: i16 = 4;

pub trait ModRules: Send + Sync {
    fn is_valid_ruleset(&self, ruleset_id: i16) -> bool;

    /// Validate a playlist item's required/allowed mod sets against each other.
    fn validate_item_mods(
        &self,
        ruleset_id: i16,
        required: &[Mod],
        allowed: &[Mod],
    ) -> Result<(), String>;

    /// Validate a user's selection against the current item's mod sets.
    fn validate_user_mods(
        &self,
        allowed: &[Mod],
        required: &[Mod],
        proposed: &[Mod],
    ) -> Result<(), String>;

    /// Reduce a selection to the subset that remains legal for the item.
    fn filter_user_mods(&self, allowed: &[Mod], proposed: &[Mod]) -> Vec<Mod>;
}

#[derive(Debug, Default)]
pub struct StandardRules;

fn has_duplicates(mods: &[Mod]) -> bool {
    mods.iter()
        .enumerate()
        .any(|(index, m)| mods[..index].contains(m))
}

impl ModRules for StandardRules {
    fn is_valid_ruleset(&self, ruleset_id: i16) -> bool {
        (0..RULESET_COUNT).contains(&ruleset_id)
    }

    fn validate_item_mods(
        &self,
        ruleset_id: i16,
        required: &[Mod],
        allowed: &[Mod],
    ) -> Result<(), String> {
        if !self.is_valid_ruleset(ruleset_id) {
            return Err(format!("ruleset `{ruleset_id}` is not playable"));
        }
        if has_duplicates(required) || has_duplicates(allowed) {
            return Err("duplicate mods in selection".into());
        }
        if let Some(overlap) = required.iter().find(|m| allowed.contains(m)) {
            return Err(format!(
                "mod `{}` cannot be both required and allowed",
                overlap.acronym
            ));
        }
        Ok(())
    }

    fn validate_user_mods(
        &self,
        allowed: &[Mod],
        required: &[Mod],
        proposed: &[Mod],
    ) -> Result<(), String> {
        if has_duplicates(proposed) {
            return Err("duplicate mods in selection".into());
        }
        if let Some(clash) = proposed.iter().find(|m| required.contains(m)) {
            return Err(format!("mod `{}` is already required", clash.acronym));
        }
        if let Some(outside) = proposed.iter().find(|m| !allowed.contains(m)) {
            return Err(format!(
                "mod `{}` is not allowed by the current item",
                outside.acronym
            ));
        }
        Ok(())
    }

    fn filter_user_mods(&self, allowed: &[Mod], proposed: &[Mod]) -> Vec<Mod> {
        let mut kept: Vec<Mod> = Vec::new();
        for m in proposed {
            if allowed.contains(m) && !kept.contains(m) {
                kept.push(m.clone());
            }
        }
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mods(acronyms: &[&str]) -> Vec<Mod> {
        acronyms.iter().map(|a| Mod::new(*a)).collect()
    }

    #[test]
    fn rulesets_are_range_checked() {
        let rules = StandardRules;
        assert!(rules.is_valid_ruleset(0));
        assert!(rules.is_valid_ruleset(3));
        assert!(!rules.is_valid_ruleset(4));
        assert!(!rules.is_valid_ruleset(-1));
    }

    #[test]
    fn required_and_allowed_must_be_disjoint() {
        let rules = StandardRules;
        assert!(
            rules
                .validate_item_mods(0, &mods(&["HD"]), &mods(&["HD", "HR"]))
                .is_err()
        );
        assert!(
            rules
                .validate_item_mods(0, &mods(&["HD"]), &mods(&["HR"]))
                .is_ok()
        );
    }

    #[test]
    fn user_selection_must_come_from_allowed() {
        let rules = StandardRules;
        let allowed = mods(&["HR", "DT"]);
        let required = mods(&["HD"]);
        assert!(
            rules
                .validate_user_mods(&allowed, &required, &mods(&["HR"]))
                .is_ok()
        );
        assert!(
            rules
                .validate_user_mods(&allowed, &required, &mods(&["FL"]))
                .is_err()
        );
        assert!(
            rules
                .validate_user_mods(&allowed, &required, &mods(&["HD"]))
                .is_err()
        );
    }

    #[test]
    fn filtering_keeps_the_legal_subset() {
        let rules = StandardRules;
        let kept = rules.filter_user_mods(&mods(&["HR", "DT"]), &mods(&["HR", "FL", "HR"]));
        assert_eq!(kept, mods(&["HR"]));
    }
}
