//! Object key layout and deployment identifiers.
//!
//! Every object of a deployment lives under `{projectId}/{deploymentId}/`;
//! the manifest sits next to the files as `_manifest.json`. Keys are plain
//! concatenations, so ids are validated before they reach `build_key`.

use chrono::Utc;
use rand::Rng;
use regex::Regex;
use std::sync::LazyLock;

pub const MANIFEST_FILE: &str = "_manifest.json";

const ID_SUFFIX_LEN: usize = 6;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

static PROJECT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("valid project id regex"));
static DEPLOYMENT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^deploy-\d+-[a-z0-9]+$").expect("valid deployment id regex"));

/// `{projectId}/{deploymentId}/{path}` with any leading `/` stripped from `path`.
pub fn build_key(project_id: &str, deployment_id: &str, path: &str) -> String {
    format!("{}/{}/{}", project_id, deployment_id, normalize_path(path))
}

pub fn manifest_key(project_id: &str, deployment_id: &str) -> String {
    build_key(project_id, deployment_id, MANIFEST_FILE)
}

/// Prefix shared by every object of one deployment, manifest included.
pub fn deployment_prefix(project_id: &str, deployment_id: &str) -> String {
    format!("{}/{}/", project_id, deployment_id)
}

pub fn project_prefix(project_id: &str) -> String {
    format!("{}/", project_id)
}

pub fn normalize_path(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// Extract the deployment id from a `{projectId}/{deploymentId}/_manifest.json` key.
pub fn deployment_id_from_manifest_key<'a>(project_id: &str, key: &'a str) -> Option<&'a str> {
    key.strip_prefix(project_id)?
        .strip_prefix('/')?
        .strip_suffix(MANIFEST_FILE)?
        .strip_suffix('/')
        .filter(|id| !id.is_empty() && !id.contains('/'))
}

/// `deploy-{unixMillis}-{6 base36 chars}`.
///
/// Unique in practice, not guaranteed: two calls in the same millisecond
/// can collide with probability 36^-6.
pub fn generate_deployment_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("deploy-{}-{}", Utc::now().timestamp_millis(), suffix)
}

pub fn is_valid_project_id(id: &str) -> bool {
    PROJECT_ID_RE.is_match(id)
}

pub fn is_valid_deployment_id(id: &str) -> bool {
    DEPLOYMENT_ID_RE.is_match(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn builds_keys_without_leading_slash() {
        assert_eq!(
            build_key("blog", "deploy-1-abc", "/assets/app.js"),
            "blog/deploy-1-abc/assets/app.js"
        );
        assert_eq!(
            build_key("blog", "deploy-1-abc", "index.html"),
            "blog/deploy-1-abc/index.html"
        );
        assert_eq!(
            manifest_key("blog", "deploy-1-abc"),
            "blog/deploy-1-abc/_manifest.json"
        );
        assert_eq!(deployment_prefix("blog", "deploy-1-abc"), "blog/deploy-1-abc/");
        assert_eq!(project_prefix("blog"), "blog/");
    }

    #[test]
    fn generated_ids_match_the_validated_shape() {
        let ids: HashSet<String> = (0..200).map(|_| generate_deployment_id()).collect();
        assert_eq!(ids.len(), 200);
        for id in &ids {
            assert!(is_valid_deployment_id(id), "{id}");
            let suffix = id.rsplit('-').next().unwrap();
            assert_eq!(suffix.len(), ID_SUFFIX_LEN);
        }
    }

    #[test]
    fn validates_ids() {
        assert!(is_valid_project_id("my_site-2"));
        assert!(!is_valid_project_id(""));
        assert!(!is_valid_project_id("a/b"));
        assert!(!is_valid_project_id("../etc"));
        assert!(!is_valid_project_id("site.com"));

        assert!(is_valid_deployment_id("deploy-1718000000000-a1b2c3"));
        assert!(!is_valid_deployment_id("deploy-abc-a1b2c3"));
        assert!(!is_valid_deployment_id("deploy-1-ABC"));
        assert!(!is_valid_deployment_id("release-1-abc"));
    }

    #[test]
    fn reads_deployment_id_back_from_manifest_keys() {
        assert_eq!(
            deployment_id_from_manifest_key("blog", "blog/deploy-1-abc/_manifest.json"),
            Some("deploy-1-abc")
        );
        assert_eq!(
            deployment_id_from_manifest_key("blog", "blog/deploy-1-abc/sub/_manifest.json"),
            None
        );
        assert_eq!(
            deployment_id_from_manifest_key("blog", "blog-2/deploy-1-abc/_manifest.json"),
            None
        );
    }
}
