mod message;
pub use message::{ChaincodeMessage, MessageType};

mod spec;
pub use spec::{
    ChaincodeId, ChaincodeInput, ChaincodeLang, ChaincodeSpec, DeploymentSpec, ExecEnv,
    InvocationSpec, LaunchSpec,
};
