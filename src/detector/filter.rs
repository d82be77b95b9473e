//! Shared package classification: one deny-list for every detection strategy.

use super::Detection;

/// Fixed deny-list of packages that are never tracked: core system surfaces
/// and input methods. Launchers are classified separately so overlay liveness
/// can react to "user went home".
const IGNORED_PACKAGES: &[&str] = &[
    "android",
    "com.android.systemui",
    "com.google.android.googlequicksearchbox",
];

const IGNORED_PREFIXES: &[&str] = &["com.android.inputmethod", "com.google.android.inputmethod"];

const LAUNCHER_PACKAGES: &[&str] = &[
    "com.android.launcher",
    "com.android.launcher2",
    "com.android.launcher3",
    "com.miui.home",
    "com.huawei.android.launcher",
    "com.sec.android.app.launcher",
    "com.samsung.android.app.launcher",
    "com.oppo.launcher",
    "com.vivo.launcher",
    "com.coloros.launcher",
    "com.lge.launcher2",
    "com.htc.launcher",
    "com.zui.launcher",
    "com.oneplus.launcher",
    "com.google.android.apps.nexuslauncher",
    "com.google.android.apps.pixel.launcher",
];

const LAUNCHER_MARKERS: &[&str] = &["launcher", "trebuchet"];

/// Classifies raw package ids into trackable apps, the governor itself,
/// launchers, and noise.
#[derive(Debug, Clone)]
pub struct PackageFilter {
    own_package: String,
}

impl PackageFilter {
    pub fn new(own_package: impl Into<String>) -> Self {
        Self {
            own_package: own_package.into(),
        }
    }

    pub fn own_package(&self) -> &str {
        &self.own_package
    }

    pub fn classify(&self, package: &str) -> Detection {
        let package = package.trim();
        if package.is_empty() || self.is_ignored(package) {
            return Detection::Unknown;
        }
        if package == self.own_package {
            return Detection::OwnPackage;
        }
        if is_launcher(package) {
            return Detection::Launcher;
        }
        Detection::App(package.to_string())
    }

    /// True for packages that never become TrackedApps and carry no signal.
    pub fn is_ignored(&self, package: &str) -> bool {
        IGNORED_PACKAGES.contains(&package)
            || IGNORED_PREFIXES.iter().any(|p| package.starts_with(p))
    }

    /// True for packages representing trackable apps.
    pub fn is_trackable(&self, package: &str) -> bool {
        matches!(self.classify(package), Detection::App(_))
    }
}

pub fn is_launcher(package: &str) -> bool {
    LAUNCHER_PACKAGES
        .iter()
        .any(|p| package == *p || package.starts_with(&format!("{p}.")))
        || LAUNCHER_MARKERS.iter().any(|m| package.contains(m))
        || package.ends_with(".home")
}

/// Human-readable fallback label when the host supplies none: the final
/// package segment, capitalised.
pub fn fallback_label(package: &str) -> String {
    let segment = package.rsplit('.').next().unwrap_or(package);
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => package.to_string(),
    }
}
