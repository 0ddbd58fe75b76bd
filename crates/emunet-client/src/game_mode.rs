//! Game mode registry and join-requirement validation.

use std::collections::HashMap;

/// Identifies an emulator build for compatibility checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulatorIdentity {
    pub core: String,
    pub version: String,
}

/// Identifies a loaded ROM for compatibility checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomIdentity {
    pub hash: [u8; 16],
}

/// A registered netplay mode and the compatibility it demands of joiners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameModeDescriptor {
    pub id: String,
    pub requires_emulator_match: bool,
    pub requires_rom_match: bool,
}

impl GameModeDescriptor {
    pub fn live_stream() -> Self {
        Self {
            id: "live-stream".to_string(),
            requires_emulator_match: false,
            requires_rom_match: false,
        }
    }

    pub fn stream_party() -> Self {
        Self {
            id: "stream-party".to_string(),
            requires_emulator_match: false,
            requires_rom_match: false,
        }
    }

    pub fn sync_rollback() -> Self {
        Self {
            id: "sync-rollback".to_string(),
            requires_emulator_match: true,
            requires_rom_match: true,
        }
    }

    pub fn link_cable() -> Self {
        Self {
            id: "link-cable".to_string(),
            requires_emulator_match: true,
            requires_rom_match: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinValidation {
    pub valid: bool,
    pub reason: Option<String>,
    pub can_spectate: bool,
}

/// Registry of mode descriptors and the join-compatibility rules bound to them.
#[derive(Default)]
pub struct GameModeManager {
    modes: HashMap<String, GameModeDescriptor>,
}

impl GameModeManager {
    pub fn new() -> Self {
        let mut mgr = Self::default();
        for mode in [
            GameModeDescriptor::live_stream(),
            GameModeDescriptor::stream_party(),
            GameModeDescriptor::sync_rollback(),
            GameModeDescriptor::link_cable(),
        ] {
            mgr.register(mode);
        }
        mgr
    }

    pub fn register(&mut self, mode: GameModeDescriptor) {
        self.modes.insert(mode.id.clone(), mode);
    }

    pub fn get(&self, mode_id: &str) -> Option<&GameModeDescriptor> {
        self.modes.get(mode_id)
    }

    /// Spectating is always allowed regardless of mismatch; only active participation is gated.
    pub fn validate_join_requirements(
        &self,
        mode_id: &str,
        local_emu: &EmulatorIdentity,
        local_rom: &RomIdentity,
        remote_emu: &EmulatorIdentity,
        remote_rom: &RomIdentity,
    ) -> JoinValidation {
        let Some(mode) = self.modes.get(mode_id) else {
            return JoinValidation {
                valid: false,
                reason: Some(format!("unknown game mode {mode_id}")),
                can_spectate: false,
            };
        };

        if mode.requires_emulator_match && local_emu != remote_emu {
            return JoinValidation {
                valid: false,
                reason: Some("emulator core/version mismatch".to_string()),
                can_spectate: true,
            };
        }
        if mode.requires_rom_match && local_rom.hash != remote_rom.hash {
            return JoinValidation {
                valid: false,
                reason: Some("rom hash mismatch".to_string()),
                can_spectate: true,
            };
        }

        JoinValidation {
            valid: true,
            reason: None,
            can_spectate: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emu(core: &str, version: &str) -> EmulatorIdentity {
        EmulatorIdentity {
            core: core.to_string(),
            version: version.to_string(),
        }
    }

    fn rom(byte: u8) -> RomIdentity {
        RomIdentity { hash: [byte; 16] }
    }

    #[test]
    fn emulator_mismatch_invalidates_but_allows_spectate() {
        let mgr = GameModeManager::new();
        let result = mgr.validate_join_requirements(
            "sync-rollback",
            &emu("nes", "1.0"),
            &rom(1),
            &emu("nes", "1.1"),
            &rom(1),
        );
        assert!(!result.valid);
        assert!(result.can_spectate);
    }

    #[test]
    fn rom_mismatch_invalidates_but_allows_spectate() {
        let mgr = GameModeManager::new();
        let result = mgr.validate_join_requirements(
            "sync-rollback",
            &emu("nes", "1.0"),
            &rom(1),
            &emu("nes", "1.0"),
            &rom(2),
        );
        assert!(!result.valid);
        assert!(result.can_spectate);
    }

    #[test]
    fn live_stream_mode_ignores_compatibility() {
        let mgr = GameModeManager::new();
        let result = mgr.validate_join_requirements(
            "live-stream",
            &emu("nes", "1.0"),
            &rom(1),
            &emu("snes", "2.0"),
            &rom(9),
        );
        assert!(result.valid);
    }

    #[test]
    fn matching_requirements_are_valid() {
        let mgr = GameModeManager::new();
        let result = mgr.validate_join_requirements(
            "link-cable",
            &emu("nes", "1.0"),
            &rom(5),
            &emu("nes", "1.0"),
            &rom(5),
        );
        assert!(result.valid);
        assert!(result.reason.is_none());
    }
}
