//! Core emulator primitives and traits.

pub mod audio;
pub mod cpu_z80;
pub mod display;
pub mod fixed;
pub mod logging;
pub mod scanline;
pub mod state;
pub mod types {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Frame {
        pub width: u32,
        pub height: u32,
        pub pixels: Vec<u32>,
    }

    impl Frame {
        pub fn new(width: u32, height: u32) -> Self {
            Self {
                width,
                height,
                pixels: vec![0; (width * height) as usize],
            }
        }
    }
}

use serde_json::Value;

/// Receiver of video chip output on the emulation thread.
pub trait VideoSink {
    /// One compressed scanline (see [`scanline`]).
    fn draw_line(&mut self, bytes: &[u8]);

    /// The vsync signal changed state during `current_slot` of the line.
    fn vsync_state_change(&mut self, new_state: bool, current_slot: u32);
}

/// Receiver of interleaved stereo samples on the emulation thread.
pub trait AudioSink {
    fn send_audio_data(&mut self, samples: &[i16]);
}

/// Description of a mount point (media slot) that a system supports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPointInfo {
    /// Unique identifier for this mount point (e.g., "rom0", "tape")
    pub id: String,
    /// User-friendly name for display (e.g., "ROM segment 0")
    pub name: String,
    /// File extensions accepted by this mount point (e.g., ["rom", "bin"])
    pub extensions: Vec<String>,
    /// Whether this mount point is required for the system to function
    pub required: bool,
}

/// A high-level System trait tying components together.
pub trait System {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Reset the machine; a cold reset also clears RAM.
    fn reset(&mut self, cold: bool);

    /// Advance emulated time by at least `microseconds`.
    fn run(&mut self, microseconds: u64);

    fn set_keyboard_state(&mut self, key_code: u8, pressed: bool);

    /// Serialize a snapshot. Mounted ROM images are not included.
    fn save_state(&self) -> Result<Vec<u8>, Self::Error>;

    /// Restore a snapshot. On error the system is left unchanged.
    fn load_state(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Check if this system supports save/load state functionality
    fn supports_save_states(&self) -> bool {
        false
    }

    /// Human-readable state for debugging.
    fn debug_state(&self) -> Value;

    /// Get the list of mount points this system supports
    fn mount_points(&self) -> Vec<MountPointInfo>;

    /// Load media into a specific mount point
    fn mount(&mut self, mount_point_id: &str, data: &[u8]) -> Result<(), Self::Error>;

    /// Unload media from a specific mount point
    fn unmount(&mut self, mount_point_id: &str) -> Result<(), Self::Error>;

    /// Check if a mount point has media loaded
    fn is_mounted(&self, mount_point_id: &str) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_initialization() {
        let f = types::Frame::new(10, 10);
        assert_eq!(f.pixels.len(), 100);
        assert_eq!(f.width, 10);
        assert_eq!(f.height, 10);
    }

    struct MockSystem {
        elapsed_us: u64,
        keys: [bool; 128],
        mounted: bool,
    }

    impl Default for MockSystem {
        fn default() -> Self {
            Self {
                elapsed_us: 0,
                keys: [false; 128],
                mounted: false,
            }
        }
    }

    #[derive(Debug, thiserror::Error)]
    enum MockError {
        #[error("bad state")]
        BadState,
    }

    impl System for MockSystem {
        type Error = MockError;

        fn reset(&mut self, _cold: bool) {
            self.elapsed_us = 0;
        }

        fn run(&mut self, microseconds: u64) {
            self.elapsed_us += microseconds;
        }

        fn set_keyboard_state(&mut self, key_code: u8, pressed: bool) {
            self.keys[(key_code & 0x7F) as usize] = pressed;
        }

        fn save_state(&self) -> Result<Vec<u8>, Self::Error> {
            Ok(self.elapsed_us.to_be_bytes().to_vec())
        }

        fn load_state(&mut self, data: &[u8]) -> Result<(), Self::Error> {
            let bytes: [u8; 8] = data.try_into().map_err(|_| MockError::BadState)?;
            self.elapsed_us = u64::from_be_bytes(bytes);
            Ok(())
        }

        fn supports_save_states(&self) -> bool {
            true
        }

        fn debug_state(&self) -> Value {
            serde_json::json!({ "elapsed_us": self.elapsed_us })
        }

        fn mount_points(&self) -> Vec<MountPointInfo> {
            vec![MountPointInfo {
                id: "rom0".to_string(),
                name: "ROM segment 0".to_string(),
                extensions: vec!["rom".to_string()],
                required: true,
            }]
        }

        fn mount(&mut self, _mount_point_id: &str, _data: &[u8]) -> Result<(), Self::Error> {
            self.mounted = true;
            Ok(())
        }

        fn unmount(&mut self, _mount_point_id: &str) -> Result<(), Self::Error> {
            self.mounted = false;
            Ok(())
        }

        fn is_mounted(&self, _mount_point_id: &str) -> bool {
            self.mounted
        }
    }

    #[test]
    fn test_mock_system_save_load_roundtrip() {
        let mut sys = MockSystem::default();
        sys.run(20_000);
        let saved = sys.save_state().unwrap();
        sys.run(20_000);

        let mut other = MockSystem::default();
        other.load_state(&saved).unwrap();
        assert_eq!(other.elapsed_us, 20_000);
        assert!(other.load_state(&saved[..3]).is_err());
        assert_eq!(other.debug_state()["elapsed_us"], 20_000);
    }

    #[test]
    fn test_system_mount_operations() {
        let mut sys = MockSystem::default();
        let points = sys.mount_points();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].id, "rom0");
        assert!(points[0].required);

        assert!(!sys.is_mounted("rom0"));
        assert!(sys.mount("rom0", &[0; 16384]).is_ok());
        assert!(sys.is_mounted("rom0"));
        assert!(sys.unmount("rom0").is_ok());
        assert!(!sys.is_mounted("rom0"));
    }

    #[test]
    fn test_sinks_are_object_safe() {
        struct Count(usize);
        impl AudioSink for Count {
            fn send_audio_data(&mut self, samples: &[i16]) {
                self.0 += samples.len();
            }
        }
        let mut sink: Box<dyn AudioSink> = Box::new(Count(0));
        sink.send_audio_data(&[1, 2, 3, 4]);

        let mut key_sys = MockSystem::default();
        key_sys.set_keyboard_state(0x85, true);
        assert!(key_sys.keys[5]);
    }
}
