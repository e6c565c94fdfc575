//! Commented configuration template
//!
//! Written on first use by mutating commands and emitted by `export-config`.
//! Every value below equals the built-in default.

pub const CONFIG_TEMPLATE: &str = r#"# forksync configuration
#
# Precedence: command-line flag > environment variable > this file > default.
# Environment variables: FORKSYNC_GIT_TIMEOUT, FORKSYNC_DOCKER_TIMEOUT,
# FORKSYNC_HEALTH_TIMEOUT, FORKSYNC_MAX_WORKERS, FORKSYNC_LOG_LEVEL,
# FORKSYNC_HTTP_PROXY, FORKSYNC_HTTPS_PROXY, FORKSYNC_NO_PROXY.

[general]
# Resolve text conflicts by taking the upstream version of each file.
# Binary, deleted and renamed conflicts always need manual resolution.
auto_merge_conflicts = true
# Push with --force-with-lease instead of failing on non-fast-forward.
force_push = false
# Refuse to touch a working tree with uncommitted changes, even with auto_stash.
safe_merge_only = false
# Save a git bundle of the repository before every update.
backup_before_update = true
# Skip the container rebuild when sources are unchanged and the service is healthy.
skip_unchanged_deploy = true
# Probe service health after deployment.
verify_health = true
# Checkpoints and bundles older than this are removed by `cleanup`.
max_backup_age_days = 30
# Register VCPChat and VCPToolBox when they are found under projects_root.
include_builtin_projects = true
# Base directory for relative project paths. Defaults to the directory
# forksync is started from.
# projects_root = "/srv/projects"

[timeouts]
git_timeout_secs = 180
docker_timeout_secs = 900
health_check_timeout_secs = 60
health_check_interval_secs = 5
wait_before_health_check_secs = 10
hook_timeout_secs = 300
# Attempts for fetch and push, including the first one.
network_retry_count = 3
network_retry_delay_secs = 5

[docker]
remove_orphans = true
# Let `cleanup` prune container resources.
auto_prune = false
# "project": images of registered deployments; "global": every dangling resource.
prune_scope = "project"
# Remove the project's images before rebuilding when its sources changed.
rebuild_on_config_change = true
# Compose command; detected (docker compose, docker-compose, podman-compose) when empty.
compose_command = []

[performance]
max_workers = 4
parallel = true

[logging]
log_level = "info"
max_log_files = 30
json_format = false

[network]
http_proxy = ""
https_proxy = ""
no_proxy = "localhost,127.0.0.1"
# false passes -c http.sslVerify=false to git.
ssl_verify = true

# Your forks of the built-in projects. Pushes go here.
[origins]
VCPChat = "https://github.com/YOUR_USERNAME/VCPChat.git"
VCPToolBox = "https://github.com/YOUR_USERNAME/VCPToolBox.git"

# Upstream overrides for the built-in projects.
[upstreams]

# Additional projects.
#
# [[projects]]
# name = "MyService"
# path = "MyService"                 # relative to projects_root
# upstream_url = "https://github.com/someone/MyService.git"
# origin_url = "https://github.com/me/MyService.git"
# branch = "main"
# auto_stash = false
# aliases = ["svc"]
#
# [[projects.hooks]]
# phase = "post"                     # "pre" or "post"
# command = "npm ci"
# required = false
#
# [projects.deployment]
# compose_file = "docker-compose.yml" # detected when omitted
# service = "app"
# port = 8080
# restart_policy = "recreate"         # "recreate", "restart" or "never"
# max_restart_attempts = 2
# health_check = { type = "http", url = "http://127.0.0.1:8080/health" }
"#;
