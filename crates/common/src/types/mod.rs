mod connection;
mod context;
mod events;
mod function;

pub use self::{
    connection::{
        ConnectionId,
        ConnectionOptions,
        DataLayout,
        EnrichedConnection,
        WorkspaceId,
    },
    context::{
        ConnectionInfo,
        DestinationInfo,
        EventContext,
        SourceInfo,
    },
    events::{
        EventType,
        IngestMessage,
        MessageOrigin,
    },
    function::{
        FunctionDefinition,
        FunctionKind,
        FunctionReference,
        BUILTIN_DESTINATION_PREFIX,
        BUILTIN_TRANSFORMATION_PREFIX,
        UDF_PIPELINE_STEP_ID,
        UDF_PREFIX,
    },
};
