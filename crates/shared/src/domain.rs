use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub i64);
    };
}

id_newtype!(RoomId);
id_newtype!(MessageId);
id_newtype!(ViewerId);
id_newtype!(FileId);

/// Opaque descriptor of a message sender as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderRef {
    pub viewer_id: ViewerId,
    pub display_name: String,
}

impl SenderRef {
    pub fn new(viewer_id: ViewerId, display_name: impl Into<String>) -> Self {
        Self {
            viewer_id,
            display_name: display_name.into(),
        }
    }
}
