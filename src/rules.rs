use crate::commands::Request;
use crate::protocol::Command;

/// RuleSet decides whether a parsed request may be served
pub trait RuleSet: Send + Sync {
    fn allow(&self, request: &Request) -> bool;
}

/// PermitCommand enables or disables each SOCKS5 command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermitCommand {
    pub enable_connect: bool,
    pub enable_bind: bool,
    pub enable_associate: bool,
}

impl PermitCommand {
    /// permit_all allows every command
    pub fn permit_all() -> Self {
        Self {
            enable_connect: true,
            enable_bind: true,
            enable_associate: true,
        }
    }

    /// permit_none denies every command
    pub fn permit_none() -> Self {
        Self {
            enable_connect: false,
            enable_bind: false,
            enable_associate: false,
        }
    }
}

impl Default for PermitCommand {
    fn default() -> Self {
        Self::permit_all()
    }
}

impl RuleSet for PermitCommand {
    fn allow(&self, request: &Request) -> bool {
        match request.command {
            Command::Connect => self.enable_connect,
            Command::Bind => self.enable_bind,
            Command::UdpAssociate => self.enable_associate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddrSpec;
    use crate::auth::AuthContext;
    use std::collections::HashMap;

    fn request(command: Command) -> Request {
        Request {
            version: 5,
            command,
            auth_context: AuthContext {
                method: 0,
                payload: HashMap::new(),
            },
            remote_addr: None,
            dest_addr: AddrSpec::from_domain("example.com", 80),
        }
    }

    #[test]
    fn permit_all_allows_everything() {
        let rules = PermitCommand::permit_all();
        assert!(rules.allow(&request(Command::Connect)));
        assert!(rules.allow(&request(Command::Bind)));
        assert!(rules.allow(&request(Command::UdpAssociate)));
    }

    #[test]
    fn permit_none_denies_everything() {
        let rules = PermitCommand::permit_none();
        assert!(!rules.allow(&request(Command::Connect)));
        assert!(!rules.allow(&request(Command::Bind)));
        assert!(!rules.allow(&request(Command::UdpAssociate)));
    }

    #[test]
    fn connect_only() {
        let rules = PermitCommand {
            enable_connect: true,
            ..PermitCommand::permit_none()
        };
        assert!(rules.allow(&request(Command::Connect)));
        assert!(!rules.allow(&request(Command::Bind)));
    }
}
