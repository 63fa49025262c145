use roomcast::DirectoryConfig;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub directory: DirectoryConfig,
    pub nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            directory: DirectoryConfig::default(),
            nodelay: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert!(config.nodelay);
        assert_eq!(config.directory.max_rooms, roomcast::directory::DEFAULT_MAX_ROOMS);
        assert_eq!(
            config.directory.room.max_clients,
            roomcast::room::DEFAULT_MAX_CLIENTS
        );
    }
}
