// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names read by dockertest

// Run Configuration
pub const DOCKERTEST_TIMEOUT_SECS: &str = "DOCKERTEST_TIMEOUT_SECS";
pub const DOCKERTEST_PATTERN: &str = "DOCKERTEST_PATTERN";
pub const DOCKERTEST_DOCKERFILE: &str = "DOCKERTEST_DOCKERFILE";

// Docker Socket Mounting
pub const DOCKERTEST_SOCK_PATH: &str = "DOCKERTEST_SOCK_PATH";

// Docker Engine Connection (read by bollard)
pub const DOCKER_HOST: &str = "DOCKER_HOST";

// Logging
pub const RUST_LOG: &str = "RUST_LOG";
