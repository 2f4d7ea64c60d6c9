use super::{
    lowlevel::{self, Connector, SftpChannel, Transport},
    retry::Retry,
    Auxiliary, ConnectionConfig, Error, SessionOptions, SessionState,
};

use std::sync::Arc;

use tokio::net::TcpStream;
use tracing::{debug, info, warn};

type TransportOf<C> = <C as Connector>::Transport;
type SftpOf<C> = <TransportOf<C> as Transport>::Sftp;

/// Waits allowed per step of a teardown, so that an unresponsive peer
/// cannot stall a disconnect.
const TEARDOWN_MAX_WAITS: usize = 3;

const DISCONNECT_DESCRIPTION: &str = "Normal Shutdown";

/// Everything `bind` to `open_sftp` produced.
struct Established<C: Connector> {
    socket: TcpStream,
    transport: TransportOf<C>,
    sftp: SftpOf<C>,
}

/// The session itself, owned and driven exclusively by the session task.
pub(super) struct SessionCore<C: Connector> {
    pub(super) connector: C,
    pub(super) config: ConnectionConfig,
    pub(super) options: SessionOptions,
    pub(super) auxiliary: Arc<Auxiliary>,

    // Declared in teardown order.
    sftp: Option<SftpOf<C>>,
    transport: Option<TransportOf<C>>,
    socket: Option<TcpStream>,
}

impl<C: Connector> SessionCore<C> {
    pub(super) fn new(
        connector: C,
        config: ConnectionConfig,
        options: SessionOptions,
        auxiliary: Arc<Auxiliary>,
    ) -> Self {
        Self {
            connector,
            config,
            options,
            auxiliary,
            sftp: None,
            transport: None,
            socket: None,
        }
    }

    /// Return the socket and the sftp channel if the session is ready.
    ///
    /// [`SessionState::Cancelling`] counts as ready, the transfer being
    /// cancelled still has to close its handles.
    pub(super) fn ready(&mut self) -> Result<(&TcpStream, &mut SftpOf<C>), Error> {
        if !matches!(
            self.auxiliary.state(),
            SessionState::Ready | SessionState::Cancelling
        ) {
            return Err(Error::NotConnected);
        }

        match (&self.socket, &mut self.sftp) {
            (Some(socket), Some(sftp)) => Ok((socket, sftp)),
            _ => Err(Error::NotConnected),
        }
    }

    pub(super) async fn connect(&mut self) -> Result<(), Error> {
        if self.auxiliary.state() != SessionState::Disconnected {
            return Err(Error::AlreadyConnected);
        }

        let res = Self::establish(
            &self.connector,
            &self.config,
            self.options,
            &self.auxiliary,
        )
        .await;

        match res {
            Ok(Established {
                socket,
                transport,
                sftp,
            }) => {
                self.socket = Some(socket);
                self.transport = Some(transport);
                self.sftp = Some(sftp);
                self.auxiliary.set_state(SessionState::Ready);

                info!(host = self.config.host(), port = self.config.port(), "connected");

                Ok(())
            }
            Err(err) => {
                // Whatever was built has been dropped in reverse order by now.
                self.auxiliary.set_socket_open(false);
                self.auxiliary.set_state(SessionState::Disconnected);

                warn!(
                    host = self.config.host(),
                    port = self.config.port(),
                    error = %err,
                    "connect failed"
                );

                Err(err)
            }
        }
    }

    async fn establish(
        connector: &C,
        config: &ConnectionConfig,
        options: SessionOptions,
        auxiliary: &Auxiliary,
    ) -> Result<Established<C>, Error> {
        let (host, port) = (config.host(), config.port());

        let socket = TcpStream::connect((host, port))
            .await
            .map_err(|source| Error::UnableToConnect {
                host: host.to_owned(),
                port,
                source,
            })?;

        // Leaves `Disconnected` only once there is a socket.
        auxiliary.set_socket_open(true);
        auxiliary.set_state(SessionState::Connecting);

        debug!(host, port, "tcp connected");

        // The engine gets its own handle on the socket, readiness is
        // awaited on the tokio one.
        let socket = socket.into_std().map_err(Error::SocketError)?;
        let engine_socket = socket.try_clone().map_err(Error::SocketError)?;
        let socket = TcpStream::from_std(socket).map_err(Error::SocketError)?;

        let mut transport = connector
            .bind(engine_socket)
            .map_err(Error::UnableToInitializeSession)?;

        auxiliary.set_state(SessionState::Authenticating);

        let retry = Retry::new(&socket, options.get_readiness_timeout());

        retry
            .run(|| transport.handshake())
            .await
            .map_err(|err| err.into_error(Error::HandshakeFailed))?;

        warn!(host, port, "host key is not verified");

        let username = config.username();
        let password = config.password();

        let methods = retry
            .run(|| transport.auth_methods(username))
            .await
            .map_err(|err| err.into_error(Error::AuthenticationFailed))?;

        debug!(methods = %methods, "authentication methods offered");

        if lowlevel::offers_auth_method(&methods, lowlevel::AUTH_METHOD_PASSWORD) {
            retry
                .run(|| transport.authenticate_password(username, password))
                .await
                .map_err(|err| err.into_error(Error::AuthenticationFailed))?;
        } else if lowlevel::offers_auth_method(&methods, lowlevel::AUTH_METHOD_KEYBOARD_INTERACTIVE)
        {
            retry
                .run(|| transport.authenticate_keyboard_interactive(username, password))
                .await
                .map_err(|err| err.into_error(Error::AuthenticationFailed))?;
        } else {
            return Err(Error::NoSupportedAuthMethod { methods });
        }

        debug!(username, "authenticated");

        let sftp = retry
            .run(|| transport.open_sftp())
            .await
            .map_err(|err| err.into_error(Error::UnableToInitializeSftp))?;

        Ok(Established {
            socket,
            transport,
            sftp,
        })
    }

    /// Shut down the sftp channel, disconnect the transport and close the
    /// socket, in that order.
    ///
    /// Every step is best-effort and bounded, the session always ends up
    /// [`SessionState::Disconnected`].
    pub(super) async fn teardown(&mut self) {
        let timeout = self.options.get_readiness_timeout();

        if let Some(mut sftp) = self.sftp.take() {
            if let Some(socket) = &self.socket {
                let res = Retry::new(socket, timeout)
                    .bounded(TEARDOWN_MAX_WAITS)
                    .run(|| sftp.shutdown())
                    .await;

                if let Err(err) = res {
                    warn!(error = ?err, "failed to shut down sftp channel");
                }
            }
        }

        if let Some(mut transport) = self.transport.take() {
            if let Some(socket) = &self.socket {
                let res = Retry::new(socket, timeout)
                    .bounded(TEARDOWN_MAX_WAITS)
                    .run(|| transport.disconnect(DISCONNECT_DESCRIPTION))
                    .await;

                if let Err(err) = res {
                    warn!(error = ?err, "failed to disconnect transport");
                }
            }
        }

        if self.socket.take().is_some() {
            debug!(host = self.config.host(), "socket closed");
        }

        self.auxiliary.set_socket_open(false);
        self.auxiliary.set_state(SessionState::Disconnected);
    }
}
