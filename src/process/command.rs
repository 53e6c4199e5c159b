use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use log::debug;
use serde::Deserialize;

use crate::error::{LauncherError, io_err};

const MAX_INHERITANCE_DEPTH: usize = 8;

/// Inputs the game needs to start, beyond the version and directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchOptions {
    pub username: String,
    pub uuid: String,
    pub token: String,
    pub jvm_arguments: Vec<String>,
    pub launcher_name: String,
    pub launcher_version: String,
}

/// Turns (version, game directory, options) into a command line whose first
/// element is the Java executable. The caller is free to replace it.
pub trait CommandBuilder: Send + Sync {
    fn build(
        &self,
        version: &str,
        game_dir: &Path,
        options: &LaunchOptions,
    ) -> Result<Vec<String>, LauncherError>;
}

/// Builds the command from an installed `versions/<id>/<id>.json` profile.
#[derive(Clone, Debug, Default)]
pub struct VersionProfileBuilder;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionProfile {
    id: String,
    inherits_from: Option<String>,
    main_class: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    assets: Option<String>,
    asset_index: Option<AssetIndex>,
    jar: Option<String>,
    #[serde(default)]
    libraries: Vec<Library>,
    arguments: Option<Arguments>,
    minecraft_arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AssetIndex {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Library {
    name: String,
    downloads: Option<LibraryDownloads>,
    #[serde(default)]
    rules: Vec<Rule>,
}

#[derive(Debug, Deserialize)]
struct LibraryDownloads {
    artifact: Option<Artifact>,
}

#[derive(Debug, Deserialize)]
struct Artifact {
    path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Arguments {
    #[serde(default)]
    game: Vec<Argument>,
    #[serde(default)]
    jvm: Vec<Argument>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Argument {
    Plain(String),
    Conditional {
        #[serde(default)]
        rules: Vec<Rule>,
        value: ArgumentValue,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ArgumentValue {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct Rule {
    action: RuleAction,
    os: Option<OsRule>,
    features: Option<serde_json::Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RuleAction {
    Allow,
    Disallow,
}

#[derive(Debug, Deserialize)]
struct OsRule {
    name: Option<String>,
    arch: Option<String>,
}

/// A profile with its `inheritsFrom` chain folded in.
struct ResolvedProfile {
    id: String,
    kind: String,
    main_class: String,
    assets_index: String,
    jar_id: String,
    libraries: Vec<Library>,
    jvm: Vec<Argument>,
    game: Vec<Argument>,
    legacy_game: Option<String>,
}

impl CommandBuilder for VersionProfileBuilder {
    fn build(
        &self,
        version: &str,
        game_dir: &Path,
        options: &LaunchOptions,
    ) -> Result<Vec<String>, LauncherError> {
        let profile = resolve(game_dir, version)?;
        let vars = placeholders(&profile, game_dir, options);

        let mut command = vec!["java".to_owned()];
        command.extend(options.jvm_arguments.iter().cloned());
        if profile.jvm.is_empty() {
            command.push(format!("-Djava.library.path={}", vars["natives_directory"]));
            command.push("-cp".into());
            command.push(vars["classpath"].clone());
        } else {
            command.extend(expand(&profile.jvm, &vars));
        }
        command.push(profile.main_class.clone());
        match &profile.legacy_game {
            Some(legacy) if profile.game.is_empty() => command.extend(
                legacy
                    .split_whitespace()
                    .map(|arg| substitute(arg, &vars)),
            ),
            _ => command.extend(expand(&profile.game, &vars)),
        }

        debug!("command: {} arguments for {}", command.len(), profile.id);
        Ok(command)
    }
}

fn profile_path(game_dir: &Path, id: &str) -> PathBuf {
    game_dir.join("versions").join(id).join(format!("{id}.json"))
}

fn load_profile(game_dir: &Path, id: &str) -> Result<VersionProfile, LauncherError> {
    let path = profile_path(game_dir, id);
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(LauncherError::Launch(format!(
                "version {id} is not installed (missing {})",
                path.display()
            )));
        }
        Err(err) => return Err(io_err(&path, err)),
    };
    serde_json::from_str(&raw)
        .map_err(|e| LauncherError::Parse(format!("{}: {e}", path.display())))
}

fn resolve(game_dir: &Path, version: &str) -> Result<ResolvedProfile, LauncherError> {
    let mut chain = vec![load_profile(game_dir, version)?];
    while let Some(parent) = chain.last().and_then(|p| p.inherits_from.clone()) {
        if chain.len() >= MAX_INHERITANCE_DEPTH || chain.iter().any(|p| p.id == parent) {
            return Err(LauncherError::Parse(format!(
                "version {version} has a circular or too deep inheritsFrom chain"
            )));
        }
        chain.push(load_profile(game_dir, &parent)?);
    }

    // Child values win; list values are parent first, except libraries.
    let id = chain[0].id.clone();
    let main_class = chain
        .iter()
        .find_map(|p| p.main_class.clone())
        .ok_or_else(|| LauncherError::Parse(format!("version {version} has no mainClass")))?;
    let kind = chain
        .iter()
        .find_map(|p| p.kind.clone())
        .unwrap_or_else(|| "release".into());
    let assets_index = chain
        .iter()
        .find_map(|p| {
            p.asset_index
                .as_ref()
                .map(|a| a.id.clone())
                .or_else(|| p.assets.clone())
        })
        .unwrap_or_else(|| "legacy".into());
    let jar_id = chain
        .iter()
        .find_map(|p| p.jar.clone())
        .or_else(|| chain.last().map(|p| p.id.clone()))
        .unwrap_or_else(|| id.clone());
    let legacy_game = chain.iter().find_map(|p| p.minecraft_arguments.clone());

    let mut libraries = Vec::new();
    let mut jvm = Vec::new();
    let mut game = Vec::new();
    for profile in chain.into_iter().rev() {
        let mut own = profile.libraries;
        own.append(&mut libraries);
        libraries = own;
        if let Some(arguments) = profile.arguments {
            jvm.extend(arguments.jvm);
            game.extend(arguments.game);
        }
    }

    Ok(ResolvedProfile {
        id,
        kind,
        main_class,
        assets_index,
        jar_id,
        libraries,
        jvm,
        game,
        legacy_game,
    })
}

fn classpath(profile: &ResolvedProfile, game_dir: &Path) -> String {
    let libraries_dir = game_dir.join("libraries");
    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    for library in &profile.libraries {
        if !rules_allow(&library.rules) {
            continue;
        }
        let relative = library
            .downloads
            .as_ref()
            .and_then(|d| d.artifact.as_ref())
            .and_then(|a| a.path.clone())
            .or_else(|| maven_path(&library.name));
        let Some(relative) = relative else {
            debug!("command: skipping library with odd name {}", library.name);
            continue;
        };
        let path = libraries_dir.join(relative).display().to_string();
        if seen.insert(path.clone()) {
            entries.push(path);
        }
    }
    let jar = game_dir
        .join("versions")
        .join(&profile.jar_id)
        .join(format!("{}.jar", profile.jar_id));
    entries.push(jar.display().to_string());
    entries.join(classpath_separator())
}

/// `group:artifact:version[:classifier]` to its repository-relative path.
fn maven_path(name: &str) -> Option<String> {
    let mut parts = name.split(':');
    let group = parts.next()?;
    let artifact = parts.next()?;
    let version = parts.next()?;
    let classifier = parts.next();
    let file = match classifier {
        Some(classifier) => format!("{artifact}-{version}-{classifier}.jar"),
        None => format!("{artifact}-{version}.jar"),
    };
    Some(format!(
        "{}/{artifact}/{version}/{file}",
        group.replace('.', "/")
    ))
}

fn classpath_separator() -> &'static str {
    if cfg!(target_os = "windows") { ";" } else { ":" }
}

fn current_os() -> &'static str {
    if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "macos") {
        "osx"
    } else {
        "linux"
    }
}

/// Mojang rule semantics: no rules means allowed; otherwise the last matching
/// rule decides, starting from disallowed.
fn rules_allow(rules: &[Rule]) -> bool {
    if rules.is_empty() {
        return true;
    }
    let mut allowed = false;
    for rule in rules {
        if rule_matches(rule) {
            allowed = rule.action == RuleAction::Allow;
        }
    }
    allowed
}

fn rule_matches(rule: &Rule) -> bool {
    // Optional features (demo mode, custom resolution, ...) are never enabled.
    if rule.features.is_some() {
        return false;
    }
    let Some(os) = &rule.os else {
        return true;
    };
    if let Some(name) = &os.name
        && name != current_os()
    {
        return false;
    }
    if let Some(arch) = &os.arch
        && arch == "x86"
        && !cfg!(target_arch = "x86")
    {
        return false;
    }
    true
}

fn placeholders(
    profile: &ResolvedProfile,
    game_dir: &Path,
    options: &LaunchOptions,
) -> HashMap<&'static str, String> {
    let dir = |p: PathBuf| p.display().to_string();
    let assets_root = dir(game_dir.join("assets"));
    HashMap::from([
        ("auth_player_name", options.username.clone()),
        ("auth_uuid", options.uuid.clone()),
        ("auth_access_token", options.token.clone()),
        ("auth_session", options.token.clone()),
        ("auth_xuid", "0".to_owned()),
        ("clientid", "0".to_owned()),
        ("user_type", "legacy".to_owned()),
        ("user_properties", "{}".to_owned()),
        ("version_name", profile.id.clone()),
        ("version_type", profile.kind.clone()),
        ("game_directory", dir(game_dir.to_path_buf())),
        ("assets_root", assets_root.clone()),
        ("game_assets", assets_root),
        ("assets_index_name", profile.assets_index.clone()),
        ("library_directory", dir(game_dir.join("libraries"))),
        (
            "natives_directory",
            dir(game_dir.join("versions").join(&profile.id).join("natives")),
        ),
        ("classpath", classpath(profile, game_dir)),
        ("classpath_separator", classpath_separator().to_owned()),
        ("launcher_name", options.launcher_name.clone()),
        ("launcher_version", options.launcher_version.clone()),
    ])
}

fn expand(arguments: &[Argument], vars: &HashMap<&'static str, String>) -> Vec<String> {
    let mut out = Vec::new();
    for argument in arguments {
        match argument {
            Argument::Plain(value) => out.push(substitute(value, vars)),
            Argument::Conditional { rules, value } if rules_allow(rules) => match value {
                ArgumentValue::One(value) => out.push(substitute(value, vars)),
                ArgumentValue::Many(values) => {
                    out.extend(values.iter().map(|v| substitute(v, vars)));
                }
            },
            Argument::Conditional { .. } => {}
        }
    }
    out
}

/// Replace every known `${key}`; unknown keys are left as written.
fn substitute(template: &str, vars: &HashMap<&'static str, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match vars.get(key) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push_str("${");
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
