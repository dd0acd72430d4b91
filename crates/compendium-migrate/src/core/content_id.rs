//! Content identifiers: stable keys derived from display names.
//!
//! Every component that turns a display name into an entity key (imports,
//! homebrew authoring, the entity resolver) goes through [`content_id`], so
//! the same name always yields the same key. Two names that normalize to the
//! same identifier denote the same entity.

/// Derive a content identifier from a display name.
///
/// The name is lowercased, every character that is not alphanumeric, `_`,
/// whitespace or `-` is dropped, runs of whitespace and hyphens collapse into
/// a single `_`, and leading/trailing underscores are trimmed.
///
/// ```
/// use compendium_migrate::core::content_id;
///
/// assert_eq!(content_id("Potion of Healing (Greater)"), "potion_of_healing_greater");
/// assert_eq!(content_id("Schmiede-Werkzeug"), "schmiede_werkzeug");
/// ```
pub fn content_id(name: &str) -> String {
    let lowered = name.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut pending_sep = false;

    for c in lowered.chars() {
        if c.is_whitespace() || c == '-' {
            pending_sep = true;
        } else if c.is_alphanumeric() || c == '_' {
            if pending_sep {
                out.push('_');
                pending_sep = false;
            }
            out.push(c);
        }
    }

    out.trim_matches('_').to_string()
}

/// Language-specific character folds applied when comparing names.
const FOLDS: &[(char, &str)] = &[('ä', "ae"), ('ö', "oe"), ('ü', "ue"), ('ß', "ss")];

/// Normalize a display name for comparison: [`content_id`] plus diacritic
/// folding, so "Schmiedewerkzüg" and "schmiedewerkzueg" compare equal.
pub fn fold_name(name: &str) -> String {
    let id = content_id(name);
    let mut out = String::with_capacity(id.len());
    for c in id.chars() {
        match FOLDS.iter().find(|(from, _)| *from == c) {
            Some((_, to)) => out.push_str(to),
            None => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_id_basic() {
        assert_eq!(content_id("Dagger"), "dagger");
        assert_eq!(content_id("Explorer's Pack"), "explorers_pack");
        assert_eq!(content_id("  Thieves' Tools  "), "thieves_tools");
    }

    #[test]
    fn test_content_id_collapses_separators() {
        assert_eq!(content_id("Ring  of -- Protection"), "ring_of_protection");
        assert_eq!(content_id("half-plate armor"), "half_plate_armor");
    }

    #[test]
    fn test_content_id_trims_underscores() {
        assert_eq!(content_id("_hidden_"), "hidden");
        assert_eq!(content_id("- +1 Shield -"), "1_shield");
    }

    #[test]
    fn test_content_id_keeps_unicode_letters() {
        assert_eq!(content_id("Rüstung des Zwergs"), "rüstung_des_zwergs");
    }

    #[test]
    fn test_content_id_collision_is_same_entity() {
        assert_eq!(content_id("Bag of Holding"), content_id("bag-of holding!"));
    }

    #[test]
    fn test_content_id_empty() {
        assert_eq!(content_id(""), "");
        assert_eq!(content_id("!!!"), "");
    }

    #[test]
    fn test_fold_name() {
        assert_eq!(fold_name("Rüstung"), "ruestung");
        assert_eq!(fold_name("Große Äxte"), "grosse_aexte");
        assert_eq!(fold_name("Schmiedewerkzeug"), "schmiedewerkzeug");
    }
}
