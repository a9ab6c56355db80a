use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatingSystem {
    Windows,
    Linux,
    MacOs,
    Unknown,
}

/// Detect the current operating system
pub fn detect_os() -> OperatingSystem {
    #[cfg(target_os = "windows")]
    return OperatingSystem::Windows;

    #[cfg(target_os = "linux")]
    return OperatingSystem::Linux;

    #[cfg(target_os = "macos")]
    return OperatingSystem::MacOs;

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    return OperatingSystem::Unknown;
}

/// Get OS name as string
pub fn get_os_name() -> String {
    match detect_os() {
        OperatingSystem::Windows => "Windows".to_string(),
        OperatingSystem::Linux => "Linux".to_string(),
        OperatingSystem::MacOs => "macOS".to_string(),
        OperatingSystem::Unknown => "Unknown".to_string(),
    }
}

/// Suffix appended to external tool base names on this platform.
pub fn executable_suffix() -> &'static str {
    executable_suffix_for(detect_os())
}

pub fn executable_suffix_for(os: OperatingSystem) -> &'static str {
    match os {
        OperatingSystem::Windows => ".exe",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_windows_gets_exe_suffix() {
        assert_eq!(executable_suffix_for(OperatingSystem::Windows), ".exe");
        assert_eq!(executable_suffix_for(OperatingSystem::Linux), "");
        assert_eq!(executable_suffix_for(OperatingSystem::MacOs), "");
        assert_eq!(executable_suffix_for(OperatingSystem::Unknown), "");
    }

    #[test]
    fn os_name_matches_detected_os() {
        let name = get_os_name();
        assert!(!name.is_empty());
        #[cfg(target_os = "linux")]
        assert_eq!(name, "Linux");
    }
}
