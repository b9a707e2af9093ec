//! Translation of the raw machine type into the display string published on
//! `/Platform`, plus the raspberry-pi-only predicate used by the registry
//! store scan (spec.md §4.3) and compatibility checks (spec.md §4.7.1).

/// Look up the display name for a raw machine type string (e.g. read from
/// `/etc/venus/machine`-equivalent config). Unknown machine types pass
/// through unchanged, matching the original's "if it's not in the table,
/// just show what we read" behavior.
pub fn translate(machine: &str) -> &str {
    match machine {
        "ccgx" => "CCGX",
        "einstein" => "Cerbo GX",
        "beaglebone" => "Venus GX",
        "canvu500" => "CanVu 500",
        "nanopi" => "Multi/Easy Solar GX",
        "raspberrypi2" => "Raspberry Pi 2/3",
        "raspberrypi4" => "Raspberry Pi 4",
        other => other,
    }
}

/// Whether the given raw machine type is some variant of Raspberry Pi.
pub fn is_raspberry_pi(machine: &str) -> bool {
    machine.starts_with("raspberrypi")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_machines_translate() {
        assert_eq!(translate("einstein"), "Cerbo GX");
        assert_eq!(translate("raspberrypi4"), "Raspberry Pi 4");
    }

    #[test]
    fn unknown_machine_passes_through() {
        assert_eq!(translate("some-future-board"), "some-future-board");
    }

    #[test]
    fn raspberry_pi_detection() {
        assert!(is_raspberry_pi("raspberrypi2"));
        assert!(is_raspberry_pi("raspberrypi4"));
        assert!(!is_raspberry_pi("einstein"));
    }
}
