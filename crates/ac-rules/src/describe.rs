//! Tooltip text for a resolution.

use std::borrow::Cow;

use crate::entry::Mode;
use crate::extract::Side;
use crate::resolve::Resolution;

/// Display strings for the tooltip; implement for other languages.
pub trait Localize {
    /// Heading of a mode's group.
    fn mode(&self, mode: Mode) -> Cow<'_, str>;

    /// Marker appended to entries from the other side.
    fn granted(&self) -> Cow<'_, str>;

    /// Text when nothing applies.
    fn nothing(&self) -> Cow<'_, str>;
}

/// English strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct English;

impl Localize for English {
    fn mode(&self, mode: Mode) -> Cow<'_, str> {
        Cow::Borrowed(match mode {
            Mode::Advantage => "Advantage",
            Mode::Disadvantage => "Disadvantage",
            Mode::NoAdvantage => "No Advantage",
            Mode::NoDisadvantage => "No Disadvantage",
            Mode::ForceAdvantage => "Forced Advantage",
            Mode::ForceDisadvantage => "Forced Disadvantage",
            Mode::Critical => "Critical",
            Mode::NoCritical => "No Critical",
            Mode::Fumble => "Fumble",
            Mode::Fail => "Fail",
            Mode::Success => "Success",
            Mode::Bonus => "Bonus",
            Mode::Modifier => "Modifier",
            Mode::ModifyAc => "Armor Class",
            Mode::ModifyDc => "Difficulty Class",
            Mode::CriticalThreshold => "Critical Threshold",
            Mode::FumbleThreshold => "Fumble Threshold",
            Mode::ExtraDice => "Extra Dice",
            Mode::DiceUpgrade => "Dice Upgrade",
            Mode::DiceDowngrade => "Dice Downgrade",
            Mode::Range => "Range",
        })
    }

    fn granted(&self) -> Cow<'_, str> {
        Cow::Borrowed("granted")
    }

    fn nothing(&self) -> Cow<'_, str> {
        Cow::Borrowed("No rules apply")
    }
}

/// One line per mode with every contributing rule, subject side first.
pub fn describe(resolution: &Resolution, localize: &dyn Localize) -> String {
    let mut lines = Vec::new();
    for mode in Mode::ALL {
        let names: Vec<String> = [Side::Subject, Side::Opponent]
            .into_iter()
            .flat_map(|side| {
                resolution.side(side).get(mode).iter().map(move |e| {
                    let mut name = e.label.clone();
                    if let Some(value) = &e.value {
                        name.push_str(&format!(" ({value})"));
                    } else if !e.modifiers.is_empty() {
                        name.push_str(&format!(" ({})", e.modifiers.join(" ")));
                    }
                    (side, name)
                })
            })
            .map(|(side, name)| match side {
                Side::Subject => name,
                Side::Opponent => format!("{name} [{}]", localize.granted()),
            })
            .collect();
        if !names.is_empty() {
            lines.push(format!("{}: {}", localize.mode(mode), names.join(", ")));
        }
    }
    if lines.is_empty() {
        return localize.nothing().into_owned();
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{AddTo, Scope};
    use crate::resolve::BucketEntry;

    fn entry(label: &str, side: Side, value: Option<&str>) -> BucketEntry {
        BucketEntry {
            id: label.to_string(),
            label: label.to_string(),
            description: None,
            scope: Scope::Source,
            side,
            value: value.map(str::to_string),
            amount: None,
            set: None,
            modifiers: Vec::new(),
            add_to: AddTo::All,
            damage_types: Vec::new(),
            priority: 0,
            short: None,
            long: None,
            no_long_disadvantage: false,
            no_nearby_foe_disadvantage: false,
        }
    }

    #[test]
    fn groups_by_mode() {
        let mut res = Resolution::default();
        res.subject
            .push(Mode::Advantage, entry("Bless", Side::Subject, None));
        res.opponent
            .push(Mode::Advantage, entry("Prone", Side::Opponent, None));
        res.subject
            .push(Mode::Bonus, entry("Bless", Side::Subject, Some("1d4")));
        assert_eq!(
            describe(&res, &English),
            "Advantage: Bless, Prone [granted]\nBonus: Bless (1d4)"
        );
    }

    #[test]
    fn empty_resolution() {
        assert_eq!(describe(&Resolution::default(), &English), "No rules apply");
    }

    struct Shouting;

    impl Localize for Shouting {
        fn mode(&self, mode: Mode) -> Cow<'_, str> {
            Cow::Owned(mode.name().to_uppercase())
        }
        fn granted(&self) -> Cow<'_, str> {
            Cow::Borrowed("THEIRS")
        }
        fn nothing(&self) -> Cow<'_, str> {
            Cow::Borrowed("NOTHING")
        }
    }

    #[test]
    fn custom_localization() {
        let mut res = Resolution::default();
        res.opponent
            .push(Mode::Disadvantage, entry("Dodge", Side::Opponent, None));
        assert_eq!(describe(&res, &Shouting), "DISADVANTAGE: Dodge [THEIRS]");
    }
}
