//! The five capability stages.
//!
//! Each later stage assumes the wire behavior proven by earlier ones (the
//! server binds, accepts, parses array frames) but launches its own fresh
//! server process.

use respcheck_core::{
    CoreError, Exchange, Expectation, Requirement, Scenario, StageDefinition, Step,
};

use crate::config::DEFAULT_PORT;

pub const STAGE_COUNT: u8 = 5;

/// Immutable set of stage definitions for one listening port.
#[derive(Debug, Clone)]
pub struct StageCatalog {
    stages: Vec<StageDefinition>,
}

impl StageCatalog {
    pub fn new(port: u16) -> Self {
        Self {
            stages: vec![
                listening_stage(port),
                ping_stage(),
                echo_stage(),
                set_stage(),
                get_stage(),
            ],
        }
    }

    pub fn get(&self, ordinal: u8) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.ordinal == ordinal)
    }

    pub fn require(&self, ordinal: u8) -> Result<&StageDefinition, CoreError> {
        self.get(ordinal).ok_or(CoreError::StageNotFound(ordinal))
    }

    pub fn is_valid(&self, ordinal: u8) -> bool {
        self.get(ordinal).is_some()
    }

    pub fn total(&self) -> usize {
        self.stages.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StageDefinition> {
        self.stages.iter()
    }

    /// Stages `1..=ordinal`, in order.
    pub fn through(&self, ordinal: u8) -> impl Iterator<Item = &StageDefinition> {
        self.stages.iter().filter(move |s| s.ordinal <= ordinal)
    }
}

impl Default for StageCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_PORT)
    }
}

fn listening_stage(port: u16) -> StageDefinition {
    let port = port.to_string();
    StageDefinition {
        ordinal: 1,
        title: "Listening for Connections".to_string(),
        requirements: vec![
            Requirement::any_of("Code imports socket library", &["import socket", "from socket"])
                .with_hint("You need to import the socket library: `import socket`"),
            Requirement::all_of(format!("Server binds to port {}", port), &["bind", port.as_str()])
                .with_hint(format!(
                    "Have you used the `socket.bind()` method to attach your server to port {port}? \
                     Example: `server.bind(('localhost', {port}))`"
                )),
            Requirement::all_of("Server listens for connections", &["listen"]).with_hint(
                "Make sure your server is calling `socket.listen()` to accept connections. \
                 Example: `server.listen(1)`",
            ),
        ],
        scenarios: Vec::new(),
    }
}

fn ping_stage() -> StageDefinition {
    StageDefinition {
        ordinal: 2,
        title: "Handle PING Command".to_string(),
        requirements: vec![
            Requirement::all_of("Code accepts client connections", &["accept"]).with_hint(
                "You need to accept incoming connections with `socket.accept()`. \
                 Example: `client_socket, address = server_socket.accept()`",
            ),
            Requirement::all_of("Code reads data from client", &["recv"]).with_hint(
                "You need to receive data from the client with `socket.recv()`. \
                 Example: `data = client_socket.recv(1024)`",
            ),
        ],
        scenarios: vec![Scenario::gating(
            "PING",
            vec![Step::Exchange(
                Exchange::new(
                    "Server responds to PING",
                    &["PING"],
                    Expectation::Status("PONG".to_string()),
                )
                .on_mismatch("Server should respond with '+PONG\\r\\n' when it receives PING")
                .on_timeout(
                    "Server didn't respond in time. Make sure it sends '+PONG\\r\\n' after receiving PING",
                )
                .on_connection(
                    "Couldn't connect to server. Make sure it's binding to the port and listening",
                ),
            )],
        )],
    }
}

fn echo_stage() -> StageDefinition {
    StageDefinition {
        ordinal: 3,
        title: "Handle ECHO Command".to_string(),
        requirements: vec![Requirement::any_of(
            "Code has RESP parsing logic",
            &["split", r"\r\n"],
        )
        .with_hint(
            "You need to parse the RESP format by splitting on '\\r\\n'. \
             Example: `lines = data.decode('utf-8').split('\\r\\n')`",
        )],
        scenarios: vec![Scenario::gating(
            "ECHO",
            vec![Step::Exchange(
                Exchange::new(
                    "Server responds to ECHO command",
                    &["ECHO", "hello"],
                    Expectation::BulkString("hello".to_string()),
                )
                .on_mismatch(
                    "Server should respond with the echoed message as a RESP bulk string. \
                     Expected format: '$5\\r\\nhello\\r\\n'",
                )
                .on_timeout(
                    "Server didn't respond in time. Make sure it parses ECHO and sends back the argument",
                )
                .on_connection("Couldn't connect to server. Check your socket binding"),
            )],
        )],
    }
}

fn set_stage() -> StageDefinition {
    StageDefinition {
        ordinal: 4,
        title: "Handle SET Command".to_string(),
        requirements: vec![
            Requirement::any_of("Code has storage mechanism", &["store", "dict", "{}"])
                .with_hint("You need a dictionary to store key-value pairs. Example: `store = {}`"),
            Requirement::any_of("Code handles SET command", &["SET", "set"])
                .with_hint("You need to check if the command is 'SET'. Example: `if command == 'SET':`"),
        ],
        scenarios: vec![Scenario::gating(
            "SET",
            vec![Step::Exchange(
                Exchange::new(
                    "Server responds to SET with +OK",
                    &["SET", "mykey", "myvalue"],
                    Expectation::Status("OK".to_string()),
                )
                .on_mismatch("Server should respond with '+OK\\r\\n' after a successful SET")
                .on_timeout(
                    "Server didn't respond in time. Make sure it handles SET and sends '+OK\\r\\n'",
                )
                .on_connection("Couldn't connect to server"),
            )],
        )],
    }
}

fn get_stage() -> StageDefinition {
    StageDefinition {
        ordinal: 5,
        title: "Handle GET Command".to_string(),
        requirements: vec![Requirement::any_of("Code handles GET command", &["GET", "get"])
            .with_hint("You need to check if the command is 'GET'. Example: `if command == 'GET':`")],
        scenarios: vec![
            Scenario::gating(
                "SET then GET",
                vec![
                    Step::Exchange(
                        Exchange::new(
                            "Server acknowledges SET",
                            &["SET", "testkey", "testvalue"],
                            Expectation::AnyReply,
                        )
                        .on_timeout("Server didn't respond to SET in time")
                        .on_connection("Couldn't connect to server"),
                    ),
                    Step::Pause,
                    Step::Exchange(
                        Exchange::new(
                            "Server handles SET followed by GET",
                            &["GET", "testkey"],
                            Expectation::BulkString("testvalue".to_string()),
                        )
                        .on_mismatch(
                            "Server should return the stored value as a bulk string. \
                             Expected 'testvalue' in response",
                        )
                        .on_timeout(
                            "Server didn't respond in time. Make sure it handles GET and returns the value",
                        )
                        .on_connection("Couldn't connect to server"),
                    ),
                ],
            ),
            Scenario::advisory(
                "GET missing key",
                vec![Step::Exchange(
                    Exchange::new(
                        "Server returns null for missing keys",
                        &["GET", "missingkey"],
                        Expectation::NullBulkString,
                    )
                    .on_mismatch("For missing keys, Redis returns '$-1\\r\\n' (null bulk string)")
                    .on_timeout(
                        "Server didn't respond in time. Make sure it handles GET and returns the value",
                    )
                    .on_connection("Couldn't connect to server"),
                )],
            ),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use respcheck_core::inspector::satisfies;

    #[test]
    fn test_catalog_has_five_ordered_stages() {
        let catalog = StageCatalog::default();
        assert_eq!(catalog.total(), STAGE_COUNT as usize);
        let ordinals: Vec<u8> = catalog.iter().map(|s| s.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 3, 4, 5]);
        assert!(catalog.is_valid(5));
        assert!(!catalog.is_valid(0));
        assert!(!catalog.is_valid(6));
        assert!(matches!(catalog.require(6), Err(CoreError::StageNotFound(6))));
    }

    #[test]
    fn test_stage_one_is_structural_only() {
        let catalog = StageCatalog::default();
        let stage = catalog.get(1).unwrap();
        assert!(stage.is_structural());
        assert_eq!(stage.requirements.len(), 3);
        assert!(catalog.iter().skip(1).all(|s| !s.is_structural()));
    }

    #[test]
    fn test_stage_one_uses_configured_port() {
        let catalog = StageCatalog::new(7001);
        let bind = &catalog.get(1).unwrap().requirements[1];
        assert!(satisfies("s.bind(('localhost', 7001))", bind));
        assert!(!satisfies("s.bind(('localhost', 6379))", bind));
    }

    #[test]
    fn test_only_missing_key_check_is_advisory() {
        let catalog = StageCatalog::default();
        let advisory: Vec<(u8, &str)> = catalog
            .iter()
            .flat_map(|stage| {
                stage
                    .scenarios
                    .iter()
                    .filter(|s| !s.gating)
                    .map(move |s| (stage.ordinal, s.label.as_str()))
            })
            .collect();
        assert_eq!(advisory, vec![(5, "GET missing key")]);
    }

    #[test]
    fn test_scripts_send_expected_frames() {
        let catalog = StageCatalog::default();
        let frames: Vec<Vec<u8>> = catalog
            .iter()
            .flat_map(|s| s.scenarios.iter())
            .flat_map(|s| s.exchanges())
            .map(Exchange::frame)
            .collect();

        assert_eq!(frames[0], b"*1\r\n$4\r\nPING\r\n".to_vec());
        assert_eq!(frames[1], b"*2\r\n$4\r\nECHO\r\n$5\r\nhello\r\n".to_vec());
        assert_eq!(
            frames[2],
            b"*3\r\n$3\r\nSET\r\n$5\r\nmykey\r\n$7\r\nmyvalue\r\n".to_vec()
        );
        assert_eq!(
            frames[3],
            b"*3\r\n$3\r\nSET\r\n$7\r\ntestkey\r\n$9\r\ntestvalue\r\n".to_vec()
        );
        assert_eq!(frames[4], b"*2\r\n$3\r\nGET\r\n$7\r\ntestkey\r\n".to_vec());
        assert_eq!(frames[5], b"*2\r\n$3\r\nGET\r\n$10\r\nmissingkey\r\n".to_vec());
    }

    #[test]
    fn test_through_selects_prefix() {
        let catalog = StageCatalog::default();
        let ordinals: Vec<u8> = catalog.through(3).map(|s| s.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 3]);
    }
}
