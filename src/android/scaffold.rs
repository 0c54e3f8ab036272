use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::error::DeployError;

const BUILD_DESCRIPTORS: &[&str] = &["build.gradle", "build.gradle.kts", "settings.gradle", "settings.gradle.kts"];

const ANDROID_GRADLE_PLUGIN: &str = "8.2.2";
const COMPILE_SDK: u32 = 34;
const MIN_SDK: u32 = 24;

/// Identity of the generated app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppIdentity {
    pub app_name: String,
    pub package_name: String,
}

impl AppIdentity {
    /// Fill in defaults from the project id and validate the package name.
    pub fn resolve(project_id: &str, app_name: Option<&str>, package_name: Option<&str>) -> Result<Self, DeployError> {
        let app_name = app_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(project_id)
            .to_string();
        let package_name = match package_name.map(str::trim).filter(|p| !p.is_empty()) {
            Some(p) => p.to_string(),
            None => default_package(project_id),
        };
        if !is_valid_package(&package_name) {
            return Err(DeployError::invalid(format!(
                "package_name '{}' must look like com.example.app",
                package_name
            )));
        }
        Ok(Self { app_name, package_name })
    }

    fn package_path(&self) -> PathBuf {
        self.package_name.split('.').collect()
    }
}

fn default_package(project_id: &str) -> String {
    let mut segment: String = project_id
        .to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    if !segment.starts_with(|c: char| c.is_ascii_alphabetic()) {
        segment.insert_str(0, "app");
    }
    format!("com.shipwright.{}", segment)
}

pub fn is_valid_package(name: &str) -> bool {
    let segments: Vec<&str> = name.split('.').collect();
    segments.len() >= 2
        && segments.iter().all(|s| {
            let mut chars = s.chars();
            chars.next().is_some_and(|c| c.is_ascii_alphabetic())
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

pub fn has_build_descriptor(root: &Path) -> bool {
    BUILD_DESCRIPTORS.iter().any(|f| root.join(f).is_file())
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "\\'")
}

fn write_if_absent(root: &Path, relative: &str, content: &str) -> Result<bool> {
    let path = root.join(relative);
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, content).with_context(|| format!("writing {}", relative))?;
    Ok(true)
}

/// Move loose top-level Java/Kotlin sources into the package directory.
fn relocate_sources(root: &Path, source_dir: &Path) -> Result<usize> {
    let mut moved = 0;
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        let is_source = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "java" || e == "kt");
        if !path.is_file() || !is_source {
            continue;
        }
        if let Some(name) = path.file_name() {
            std::fs::create_dir_all(source_dir)?;
            std::fs::rename(&path, source_dir.join(name))?;
            moved += 1;
        }
    }
    Ok(moved)
}

fn wrapper_script() -> &'static str {
    "#!/bin/sh\n\
     # Delegates to the Gradle on PATH.\n\
     exec gradle \"$@\"\n"
}

/// Wrap the caller's files in a minimal single-module Gradle project.
/// Files the caller already supplied are left untouched.
pub fn scaffold(root: &Path, identity: &AppIdentity, sdk_dir: Option<&Path>) -> Result<()> {
    let source_dir = root.join("app/src/main/java").join(identity.package_path());
    let moved = relocate_sources(root, &source_dir)?;

    let settings = format!(
        "pluginManagement {{\n    repositories {{\n        google()\n        mavenCentral()\n        gradlePluginPortal()\n    }}\n}}\n\
         dependencyResolutionManagement {{\n    repositories {{\n        google()\n        mavenCentral()\n    }}\n}}\n\
         rootProject.name = \"{}\"\ninclude ':app'\n",
        identity.app_name.replace('"', "")
    );
    write_if_absent(root, "settings.gradle", &settings)?;
    write_if_absent(
        root,
        "build.gradle",
        &format!(
            "plugins {{\n    id 'com.android.application' version '{}' apply false\n}}\n",
            ANDROID_GRADLE_PLUGIN
        ),
    )?;
    write_if_absent(root, "gradle.properties", "android.useAndroidX=true\norg.gradle.jvmargs=-Xmx2048m\n")?;
    write_if_absent(
        root,
        "app/build.gradle",
        &format!(
            "plugins {{\n    id 'com.android.application'\n}}\n\n\
             android {{\n    namespace '{pkg}'\n    compileSdk {sdk}\n\n    defaultConfig {{\n        applicationId '{pkg}'\n        minSdk {min}\n        targetSdk {sdk}\n        versionCode 1\n        versionName '1.0'\n    }}\n\n\
             \x20   compileOptions {{\n        sourceCompatibility JavaVersion.VERSION_17\n        targetCompatibility JavaVersion.VERSION_17\n    }}\n}}\n",
            pkg = identity.package_name,
            sdk = COMPILE_SDK,
            min = MIN_SDK
        ),
    )?;
    write_if_absent(
        root,
        "app/src/main/AndroidManifest.xml",
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <manifest xmlns:android=\"http://schemas.android.com/apk/res/android\">\n\
         \x20   <application android:label=\"@string/app_name\">\n\
         \x20       <activity android:name=\".MainActivity\" android:exported=\"true\">\n\
         \x20           <intent-filter>\n\
         \x20               <action android:name=\"android.intent.action.MAIN\" />\n\
         \x20               <category android:name=\"android.intent.category.LAUNCHER\" />\n\
         \x20           </intent-filter>\n\
         \x20       </activity>\n\
         \x20   </application>\n\
         </manifest>\n",
    )?;

    let has_activity = ["MainActivity.java", "MainActivity.kt"]
        .iter()
        .any(|f| source_dir.join(f).is_file());
    if !has_activity {
        std::fs::create_dir_all(&source_dir)?;
        std::fs::write(
            source_dir.join("MainActivity.java"),
            format!(
                "package {};\n\n\
                 import android.app.Activity;\n\
                 import android.os.Bundle;\n\n\
                 public class MainActivity extends Activity {{\n\
                 \x20   @Override\n\
                 \x20   protected void onCreate(Bundle savedInstanceState) {{\n\
                 \x20       super.onCreate(savedInstanceState);\n\
                 \x20       setContentView(R.layout.activity_main);\n\
                 \x20   }}\n\
                 }}\n",
                identity.package_name
            ),
        )?;
    }

    write_if_absent(
        root,
        "app/src/main/res/layout/activity_main.xml",
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <LinearLayout xmlns:android=\"http://schemas.android.com/apk/res/android\"\n\
         \x20   android:layout_width=\"match_parent\"\n\
         \x20   android:layout_height=\"match_parent\"\n\
         \x20   android:gravity=\"center\"\n\
         \x20   android:orientation=\"vertical\">\n\
         \x20   <TextView\n\
         \x20       android:layout_width=\"wrap_content\"\n\
         \x20       android:layout_height=\"wrap_content\"\n\
         \x20       android:text=\"@string/app_name\" />\n\
         </LinearLayout>\n",
    )?;
    write_if_absent(
        root,
        "app/src/main/res/values/strings.xml",
        &format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<resources>\n    <string name=\"app_name\">{}</string>\n</resources>\n",
            escape_xml(&identity.app_name)
        ),
    )?;

    if let Some(sdk) = sdk_dir {
        write_if_absent(root, "local.properties", &format!("sdk.dir={}\n", sdk.display()))?;
    }

    if write_if_absent(root, "gradlew", wrapper_script())? {
        make_executable(&root.join("gradlew"))?;
    }

    debug!(package = %identity.package_name, moved, "android project scaffolded");
    Ok(())
}

#[cfg(unix)]
pub fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o755);
    std::fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
pub fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
