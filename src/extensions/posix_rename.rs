use super::{wire, Error, ExtendedCommandTransport, ExtensionClient};

/// The `posix-rename@openssh.com` extension: rename with POSIX semantics,
/// replacing `newpath` if it exists.
#[derive(Debug, Clone)]
pub struct PosixRenameExtension<T> {
    client: ExtensionClient<T>,
}

impl<T: ExtendedCommandTransport> PosixRenameExtension<T> {
    pub const NAME: &'static str = "posix-rename@openssh.com";

    pub fn new(transport: T) -> Self {
        Self {
            client: ExtensionClient::new(Self::NAME, transport),
        }
    }

    pub async fn rename(&self, oldpath: &str, newpath: &str) -> Result<(), Error> {
        let mut buffer = self
            .client
            .command_buffer(4 + oldpath.len() + 4 + newpath.len())?;
        wire::put_string(&mut buffer, oldpath.as_bytes())?;
        wire::put_string(&mut buffer, newpath.as_bytes())?;

        #[cfg(feature = "tracing")]
        tracing::debug!("rename({}) {oldpath} => {newpath}", Self::NAME);

        self.client.send_and_check_status(buffer).await
    }
}
