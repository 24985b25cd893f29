//! Payload provenance.

/// Where a payload came from.
///
/// Sources are local bookkeeping and never travel over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PayloadSource {
    /// Downloaded during sync.
    RemoteRetrieved,
    /// Acknowledged by the server after upload.
    RemoteSaved,
    /// Written to local storage by an offline sync.
    LocalSaved,
    /// Loaded from local storage.
    LocalRetrieved,
    /// Produced by a local mutation.
    LocalChanged,
    /// Sent by a component.
    ComponentRetrieved,
    /// Installed by a desktop host.
    DesktopInstalled,
    /// Returned by a remote action.
    RemoteActionRetrieved,
    /// Read from an import file.
    FileImport,
    /// Produced while resolving a server-reported conflict.
    RemoteConflict,
    /// Produced while resolving an import conflict.
    ImportConflict,
    /// Being saved.
    SavedOrSaving,
    /// Decrypted for one-off use and not indexed.
    DecryptedTransient,
    /// Produced by a uuid alternation.
    ConflictUuid,
    /// Produced by a data conflict duplicate.
    ConflictData,
    /// A session history snapshot.
    SessionHistory,
    /// A server history revision.
    ServerHistory,
    /// Freshly constructed.
    #[default]
    Constructor,
    /// Created by a component.
    ComponentCreated,
}

impl PayloadSource {
    /// True for sources that carry state fetched from elsewhere.
    pub fn is_retrieved(&self) -> bool {
        matches!(
            self,
            PayloadSource::RemoteRetrieved
                | PayloadSource::ComponentRetrieved
                | PayloadSource::RemoteActionRetrieved
        )
    }

    /// True for sources that originate from the sync server.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            PayloadSource::RemoteRetrieved
                | PayloadSource::RemoteSaved
                | PayloadSource::RemoteActionRetrieved
                | PayloadSource::RemoteConflict
        )
    }

    /// True for history snapshots.
    pub fn is_history(&self) -> bool {
        matches!(
            self,
            PayloadSource::SessionHistory | PayloadSource::ServerHistory
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(PayloadSource::RemoteRetrieved.is_retrieved());
        assert!(PayloadSource::ComponentRetrieved.is_retrieved());
        assert!(!PayloadSource::RemoteSaved.is_retrieved());
        assert!(PayloadSource::RemoteSaved.is_remote());
        assert!(!PayloadSource::LocalChanged.is_remote());
        assert!(PayloadSource::ServerHistory.is_history());
        assert_eq!(PayloadSource::default(), PayloadSource::Constructor);
    }
}
