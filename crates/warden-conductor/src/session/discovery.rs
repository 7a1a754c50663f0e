//! Skill and sub-agent discovery.
//!
//! Definitions are looked up through an ordered list of resolver
//! directories: project provider-specific, project generic, user
//! provider-specific, user generic. The first definition of a name wins.
//! Skills live in `<dir>/skills/<name>/SKILL.md`; sub-agents in
//! `<dir>/agents/<name>.md`. Both carry YAML frontmatter.

use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::adapter::SubAgentDefinition;

/// Where user-level definitions are searched.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryRoots {
    /// User home; `~/.<provider>` is the provider-specific user directory.
    pub home: Option<PathBuf>,
    /// Warden's own store root, the generic user directory.
    pub warden_home: Option<PathBuf>,
}

/// One directory searched for definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolver {
    pub label: &'static str,
    pub dir: PathBuf,
}

pub fn resolvers(project_root: &Path, provider: &str, roots: &DiscoveryRoots) -> Vec<Resolver> {
    let mut list = vec![
        Resolver {
            label: "project-provider",
            dir: project_root.join(format!(".{provider}")),
        },
        Resolver {
            label: "project",
            dir: project_root.join(".warden"),
        },
    ];
    if let Some(home) = &roots.home {
        list.push(Resolver {
            label: "user-provider",
            dir: home.join(format!(".{provider}")),
        });
    }
    if let Some(warden_home) = &roots.warden_home {
        list.push(Resolver {
            label: "user",
            dir: warden_home.clone(),
        });
    }
    list
}

#[derive(Debug, Clone, PartialEq)]
pub struct Skill {
    pub name: String,
    pub description: String,
    /// Path of the `SKILL.md` file.
    pub path: PathBuf,
    pub source: &'static str,
}

#[derive(Debug, Default, Deserialize)]
struct Frontmatter {
    name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    tools: Option<ToolList>,
    #[serde(default)]
    model: Option<String>,
}

/// `tools: Read, Grep` or `tools: [Read, Grep]`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ToolList {
    Csv(String),
    List(Vec<String>),
}

impl ToolList {
    fn into_vec(self) -> Vec<String> {
        match self {
            ToolList::Csv(s) => s
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect(),
            ToolList::List(v) => v,
        }
    }
}

/// Split `---` frontmatter from the body. Files without it are all body.
fn split_frontmatter(content: &str) -> Result<(Frontmatter, &str), serde_yaml::Error> {
    let Some(rest) = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))
    else {
        return Ok((Frontmatter::default(), content));
    };
    let Some(end) = rest.find("\n---") else {
        return Ok((Frontmatter::default(), content));
    };
    let yaml = &rest[..end];
    let body = rest[end + 4..].trim_start_matches(['\r', '\n']);
    let front = if yaml.trim().is_empty() {
        Frontmatter::default()
    } else {
        serde_yaml::from_str(yaml)?
    };
    Ok((front, body))
}

fn load_skill(dir: &Path, source: &'static str) -> Result<Skill, String> {
    let path = dir.join("SKILL.md");
    let content = fs::read_to_string(&path).map_err(|e| e.to_string())?;
    let (front, _) = split_frontmatter(&content).map_err(|e| e.to_string())?;
    let fallback = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Skill {
        name: front.name.unwrap_or(fallback),
        description: front.description,
        path,
        source,
    })
}

fn load_sub_agent(path: &Path) -> Result<SubAgentDefinition, String> {
    let content = fs::read_to_string(path).map_err(|e| e.to_string())?;
    let (front, body) = split_frontmatter(&content).map_err(|e| e.to_string())?;
    let fallback = path
        .file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(SubAgentDefinition {
        name: front.name.unwrap_or(fallback),
        description: front.description,
        prompt: body.trim().to_string(),
        tools: front.tools.map(ToolList::into_vec),
        model: front.model,
    })
}

fn sorted_entries(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return vec![];
    };
    let mut paths: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    paths.sort();
    paths
}

/// Skills visible to a session, first definition of each name winning.
pub fn discover_skills(resolvers: &[Resolver]) -> Vec<Skill> {
    let mut seen = HashSet::new();
    let mut skills = Vec::new();
    for resolver in resolvers {
        for path in sorted_entries(&resolver.dir.join("skills")) {
            if !path.join("SKILL.md").is_file() {
                continue;
            }
            match load_skill(&path, resolver.label) {
                Ok(skill) => {
                    if seen.insert(skill.name.clone()) {
                        debug!(name = %skill.name, source = resolver.label, "loaded skill");
                        skills.push(skill);
                    } else {
                        debug!(name = %skill.name, source = resolver.label, "skill shadowed");
                    }
                }
                Err(e) => debug!(path = %path.display(), error = %e, "failed to load skill"),
            }
        }
    }
    skills.sort_by(|a, b| a.name.cmp(&b.name));
    skills
}

pub fn discover_sub_agents(resolvers: &[Resolver]) -> Vec<SubAgentDefinition> {
    let mut seen = HashSet::new();
    let mut agents = Vec::new();
    for resolver in resolvers {
        for path in sorted_entries(&resolver.dir.join("agents")) {
            if path.extension().and_then(|e| e.to_str()) != Some("md") || !path.is_file() {
                continue;
            }
            match load_sub_agent(&path) {
                Ok(agent) if agent.prompt.is_empty() => {
                    debug!(path = %path.display(), "sub-agent has no prompt; skipped")
                }
                Ok(agent) => {
                    if seen.insert(agent.name.clone()) {
                        debug!(name = %agent.name, source = resolver.label, "loaded sub-agent");
                        agents.push(agent);
                    }
                }
                Err(e) => debug!(path = %path.display(), error = %e, "failed to load sub-agent"),
            }
        }
    }
    agents.sort_by(|a, b| a.name.cmp(&b.name));
    agents
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn resolver_order() {
        let roots = DiscoveryRoots {
            home: Some(PathBuf::from("/home/u")),
            warden_home: Some(PathBuf::from("/data/warden")),
        };
        let labels: Vec<&str> = resolvers(Path::new("/repo"), "claude", &roots)
            .iter()
            .map(|r| r.label)
            .collect();
        assert_eq!(labels, ["project-provider", "project", "user-provider", "user"]);
        assert_eq!(
            resolvers(Path::new("/repo"), "claude", &roots)[0].dir,
            PathBuf::from("/repo/.claude")
        );
    }

    #[test]
    fn first_definition_wins() {
        let project = tempfile::tempdir().unwrap();
        let home = tempfile::tempdir().unwrap();
        write(
            &project.path().join(".claude/skills/deploy/SKILL.md"),
            "---\nname: deploy\ndescription: project deploy\n---\nSteps",
        );
        write(
            &home.path().join(".claude/skills/deploy/SKILL.md"),
            "---\nname: deploy\ndescription: user deploy\n---\n",
        );
        write(
            &home.path().join(".claude/skills/lint/SKILL.md"),
            "no frontmatter at all",
        );
        let roots = DiscoveryRoots {
            home: Some(home.path().to_path_buf()),
            warden_home: None,
        };
        let skills = discover_skills(&resolvers(project.path(), "claude", &roots));
        assert_eq!(skills.len(), 2);
        assert_eq!(skills[0].name, "deploy");
        assert_eq!(skills[0].description, "project deploy");
        assert_eq!(skills[0].source, "project-provider");
        // Name falls back to the directory.
        assert_eq!(skills[1].name, "lint");
    }

    #[test]
    fn sub_agents_parse_tools_and_prompt() {
        let project = tempfile::tempdir().unwrap();
        write(
            &project.path().join(".warden/agents/reviewer.md"),
            "---\nname: reviewer\ndescription: Reviews diffs\ntools: Read, Grep\nmodel: haiku\n---\n\nYou review code.\n",
        );
        write(
            &project.path().join(".warden/agents/tester.md"),
            "---\ntools: [Bash]\n---\nRun the tests.",
        );
        write(&project.path().join(".warden/agents/notes.txt"), "ignored");
        let agents = discover_sub_agents(&resolvers(
            project.path(),
            "claude",
            &DiscoveryRoots::default(),
        ));
        assert_eq!(agents.len(), 2);
        assert_eq!(agents[0].name, "reviewer");
        assert_eq!(agents[0].prompt, "You review code.");
        assert_eq!(
            agents[0].tools.as_deref(),
            Some(&["Read".to_string(), "Grep".to_string()][..])
        );
        assert_eq!(agents[0].model.as_deref(), Some("haiku"));
        assert_eq!(agents[1].name, "tester");
    }

    #[test]
    fn bad_frontmatter_is_skipped() {
        let project = tempfile::tempdir().unwrap();
        write(
            &project.path().join(".warden/skills/broken/SKILL.md"),
            "---\nname: [unclosed\n---\n",
        );
        let skills = discover_skills(&resolvers(
            project.path(),
            "claude",
            &DiscoveryRoots::default(),
        ));
        assert!(skills.is_empty());
    }
}
