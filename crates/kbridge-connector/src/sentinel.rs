/// Magic strings the classification table keys on.
///
/// Kept in one enumerated set so every structural match in the connector is
/// auditable from a single place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sentinel {
    /// `source.action` of the assistant's generic "anything else" handler.
    FallbackAction,
    /// `source.action` of the assistant's welcome handler.
    WelcomeAction,
    /// Dialog node title of the "anything else" fallback node.
    FallbackNode,
    /// Dialog node title of the welcome node.
    WelcomeNode,
    /// `DIRECT_CALL` attribute marking a goodbye answer.
    Goodbye,
    /// `DIRECT_CALL` attribute asking the user whether to reach an agent.
    EscalationStart,
    /// `actionField.fieldType` that carries no extra payload.
    DefaultField,
    /// `actionField.fieldType` carrying selectable list values.
    ListField,
}

impl Sentinel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Sentinel::FallbackAction => "anything_else",
            Sentinel::WelcomeAction => "welcome",
            Sentinel::FallbackNode => "Anything else",
            Sentinel::WelcomeNode => "Welcome",
            Sentinel::Goodbye => "sys-goodbye",
            Sentinel::EscalationStart => "escalationStart",
            Sentinel::DefaultField => "default",
            Sentinel::ListField => "list",
        }
    }

    pub fn matches(self, candidate: Option<&str>) -> bool {
        candidate == Some(self.as_str())
    }
}
