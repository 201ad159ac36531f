use ports_config::{Forward, Profile, expand_tilde};

/// `bind:localPort:remoteHost:remotePort`, the value of one `-L` flag.
pub fn forward_spec(forward: &Forward) -> String {
    format!(
        "{}:{}:{}:{}",
        forward.bind_or_default(),
        forward.local_port,
        forward.remote_host,
        forward.remote_port
    )
}

/// Builds the client arguments: no remote command, no tty, fail if a forward
/// cannot bind, the identity file, the forwards, then the target.
pub fn build_ssh_args(profile: &Profile) -> Vec<String> {
    let mut args = vec![
        "-N".to_string(),
        "-T".to_string(),
        "-o".to_string(),
        "ExitOnForwardFailure=yes".to_string(),
        "-i".to_string(),
        expand_tilde(&profile.key_path).to_string_lossy().into_owned(),
    ];

    for forward in &profile.forwards {
        args.push("-L".to_string());
        args.push(forward_spec(forward));
    }

    args.push(profile.target());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forward(bind: &str, local_port: u16, remote_host: &str, remote_port: u16) -> Forward {
        Forward {
            bind: bind.to_string(),
            local_port,
            remote_host: remote_host.to_string(),
            remote_port,
        }
    }

    #[test]
    fn test_forward_spec_defaults_empty_bind() {
        let spec = forward_spec(&forward("", 5432, "127.0.0.1", 5432));
        assert_eq!(spec, "127.0.0.1:5432:127.0.0.1:5432");
    }

    #[test]
    fn test_forward_spec_keeps_wildcard_bind() {
        let spec = forward_spec(&forward("0.0.0.0", 8080, "web.internal", 80));
        assert_eq!(spec, "0.0.0.0:8080:web.internal:80");
    }

    #[test]
    fn test_build_ssh_args_order() {
        let profile = Profile {
            name: "db".to_string(),
            host: "db.example.com".to_string(),
            user: "sam".to_string(),
            key_path: "/keys/id_ed25519".to_string(),
            forwards: vec![
                forward("", 5432, "127.0.0.1", 5432),
                forward("::", 6379, "cache", 6379),
            ],
        };

        assert_eq!(
            build_ssh_args(&profile),
            vec![
                "-N",
                "-T",
                "-o",
                "ExitOnForwardFailure=yes",
                "-i",
                "/keys/id_ed25519",
                "-L",
                "127.0.0.1:5432:127.0.0.1:5432",
                "-L",
                ":::6379:cache:6379",
                "sam@db.example.com",
            ]
        );
    }

    #[test]
    fn test_build_ssh_args_expands_key_path() {
        let profile = Profile {
            name: "bastion".to_string(),
            host: "b".to_string(),
            user: "u".to_string(),
            key_path: "~/.ssh/id_rsa".to_string(),
            forwards: Vec::new(),
        };

        let args = build_ssh_args(&profile);
        assert_eq!(args.len(), 7);
        assert!(!args[5].starts_with('~'), "key path not expanded: {}", args[5]);
        assert!(args[5].ends_with(".ssh/id_rsa"));
        assert_eq!(args[6], "u@b");
    }
}
