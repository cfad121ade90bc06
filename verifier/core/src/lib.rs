pub mod diff;
pub mod publish;
pub mod race;
pub mod retry;
pub mod scenario;
pub mod services;
pub mod session;
pub mod stream;

pub use diff::{matches, MatchExpectation, ObjectDiff, PayloadMismatch};
pub use publish::{MqttPublisher, PublishError};
pub use race::{race, Emitter, EventRace, RaceError};
pub use retry::{retry, RetryExhausted, RetryPolicy};
pub use scenario::{
    Collaborators, PublishingHistory, PublishingPushChannel, RunReport, ScenarioContext,
    ScenarioError, ScenarioOutcome, ScenarioResult, ScenarioRunner, ScenarioSettings, Step,
    StepFailure, UseCase,
};
pub use services::{
    ChannelTokenIssuer, CredentialExchange, DynError, HistoryStore, Publisher,
    ResourceProvisioning,
};
pub use session::{Principal, PrincipalSession};
pub use stream::{ConnectionState, ReconnectingStreamClient, SocketIoTransport, StreamTransport};
