/// Which reply stream of a named shadow a topic belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowTopic {
    UpdateAccepted,
    UpdateRejected,
    UpdateDelta,
    DeleteAccepted,
    DeleteRejected,
}

/// Topic names of one named shadow: `$aws/things/<thing>/shadow/name/<shadow>/...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowTopics {
    base: String,
}

impl ShadowTopics {
    pub fn new(thing: &str, shadow: &str) -> Self {
        Self {
            base: format!("$aws/things/{}/shadow/name/{}", thing, shadow),
        }
    }

    pub fn update(&self) -> String {
        format!("{}/update", self.base)
    }

    pub fn update_accepted(&self) -> String {
        format!("{}/update/accepted", self.base)
    }

    pub fn update_rejected(&self) -> String {
        format!("{}/update/rejected", self.base)
    }

    pub fn update_delta(&self) -> String {
        format!("{}/update/delta", self.base)
    }

    pub fn delete(&self) -> String {
        format!("{}/delete", self.base)
    }

    pub fn delete_accepted(&self) -> String {
        format!("{}/delete/accepted", self.base)
    }

    pub fn delete_rejected(&self) -> String {
        format!("{}/delete/rejected", self.base)
    }

    /// Filters a channel subscribes to, delete before update
    pub fn subscriptions(&self) -> [String; 5] {
        [
            self.delete_accepted(),
            self.delete_rejected(),
            self.update_accepted(),
            self.update_rejected(),
            self.update_delta(),
        ]
    }

    pub fn classify(&self, topic: &str) -> Option<ShadowTopic> {
        let suffix = topic.strip_prefix(self.base.as_str())?.strip_prefix('/')?;
        match suffix {
            "update/accepted" => Some(ShadowTopic::UpdateAccepted),
            "update/rejected" => Some(ShadowTopic::UpdateRejected),
            "update/delta" => Some(ShadowTopic::UpdateDelta),
            "delete/accepted" => Some(ShadowTopic::DeleteAccepted),
            "delete/rejected" => Some(ShadowTopic::DeleteRejected),
            _ => None,
        }
    }
}
