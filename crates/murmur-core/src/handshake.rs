//! HELLO / AUTH / OKAY secret handshake.
//!
//! Both peers run the same state machine. Each sends HELLO, answers the
//! remote HELLO with AUTH, answers the remote AUTH with OKAY and finishes on
//! the remote OKAY:
//!
//! ```text
//!   Idle ──hello()──► HelloSent ──HELLO──► AuthPending ──reply()──► AuthSent
//!                                                                    │
//!   Done ◄──OKAY── OkaySent ◄──reply()── OkayPending ◄──AUTH─────────┘
//! ```
//!
//! Any verification failure moves to `Failed`, which is terminal.
//!
//! Notation (`K` shared secret, `A`/`a` long-term/session keys, lower case
//! for the remote peer's `B`/`b`, `DH(x, Y)` = X25519 of own secret `x`
//! against public `Y`):
//!
//! ```text
//! HELLO  key1 = keyed_hash(K, DH(a, B))
//!        mac(A, key1) ‖ a.pub                       nonce = H(mac, 24)
//! AUTH   key2 = K ‖ DH(a, b) ‖ DH(a, B)
//!        seal(A ‖ sign(K ‖ B ‖ H(DH(a, b))) ‖ caps, key2, nonce)
//! OKAY   key3 = K ‖ DH(a, b) ‖ DH(a, B) ‖ DH(A, b)
//!        seal(sign(K ‖ H(DH(a, b))), key3, nonce)
//! ```
//!
//! The session key is `K ‖ DH(a, b) ‖ sort(DH(a, B), DH(A, b)) ‖ authorized`,
//! so both peers derive identical material and a different authorization
//! yields an unrelated key.

use crate::capability::CapabilitySet;
use crate::error::HandshakeError;
use murmur_crypto::aead::{AeadKey, Nonce};
use murmur_crypto::hash::{self, Kdf};
use murmur_crypto::ratchet::ChainKey;
use murmur_crypto::x25519::{self, SharedSecret};
use murmur_crypto::{
    CryptoError, KeyPair, MAC_SIZE, PUBLIC_KEY_SIZE, SIGNATURE_SIZE, Signature, VerifyingKey,
    XCHACHA_NONCE_SIZE,
};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use zeroize::Zeroizing;

const AUTH_BOX_CONTEXT: &str = "murmur 2024-06 handshake auth box";
const OKAY_BOX_CONTEXT: &str = "murmur 2024-06 handshake okay box";

/// Handshake state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing sent yet
    Idle,
    /// HELLO sent, waiting for the remote HELLO
    HelloSent,
    /// Remote HELLO verified, preparing AUTH
    AuthPending,
    /// AUTH sent, waiting for the remote AUTH
    AuthSent,
    /// Remote AUTH verified, preparing OKAY
    OkayPending,
    /// OKAY sent, waiting for the remote OKAY
    OkaySent,
    /// Remote OKAY verified
    Done,
    /// A verification failed
    Failed,
}

impl HandshakeState {
    /// State name for diagnostics
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::HelloSent => "hello-sent",
            Self::AuthPending => "auth-pending",
            Self::AuthSent => "auth-sent",
            Self::OkayPending => "okay-pending",
            Self::OkaySent => "okay-sent",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

/// Result of feeding one inbound message to the handshake
#[derive(Debug)]
pub enum Step {
    /// Send this message to the remote
    Send(Vec<u8>),
    /// Handshake finished
    Complete(Session),
}

/// Outcome of a completed handshake
pub struct Session {
    remote_session_key: VerifyingKey,
    nonce: Nonce,
    remote_nonce: Nonce,
    authorized: CapabilitySet,
    key: ChainKey,
}

impl Session {
    /// Remote session public key
    #[must_use]
    pub fn remote_session_key(&self) -> &VerifyingKey {
        &self.remote_session_key
    }

    /// Local nonce (from our HELLO)
    #[must_use]
    pub fn nonce(&self) -> Nonce {
        self.nonce
    }

    /// Remote nonce (from the remote HELLO)
    #[must_use]
    pub fn remote_nonce(&self) -> Nonce {
        self.remote_nonce
    }

    /// Negotiated authorization
    #[must_use]
    pub fn authorized(&self) -> &CapabilitySet {
        &self.authorized
    }

    /// Session key material
    #[must_use]
    pub fn key(&self) -> &ChainKey {
        &self.key
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("remote_session_key", &self.remote_session_key)
            .field("authorized", &self.authorized)
            .finish_non_exhaustive()
    }
}

/// DH terms fixed once the remote session key is known
struct Terms {
    /// DH(a, b)
    sessions: SharedSecret,
    /// DH(a, B)
    session_identity: SharedSecret,
    /// DH(A, b)
    identity_session: SharedSecret,
}

impl Terms {
    fn compute(
        identity: &KeyPair,
        session: &KeyPair,
        remote_identity: &VerifyingKey,
        remote_session: &VerifyingKey,
    ) -> Result<Self, CryptoError> {
        Ok(Self {
            sessions: x25519::shared(session, remote_session)?,
            session_identity: x25519::shared(session, remote_identity)?,
            identity_session: x25519::shared(identity, remote_session)?,
        })
    }
}

fn hello_key(
    shared_key: &[u8; 32],
    own: &KeyPair,
    peer: &VerifyingKey,
) -> Result<[u8; 32], CryptoError> {
    let inner = x25519::shared(own, peer)?;
    Ok(hash::keyed_hash(shared_key, inner.as_bytes()))
}

fn box_key(context: &'static str, parts: &[&[u8]]) -> AeadKey {
    let material = Zeroizing::new(parts.concat());
    AeadKey::new(Kdf::new(context).derive_key(&material))
}

fn concat(parts: &[&[u8]]) -> Vec<u8> {
    parts.concat()
}

fn nonce_from_mac(mac: &[u8]) -> Nonce {
    Nonce::from_bytes(hash::hash_n::<XCHACHA_NONCE_SIZE>(mac))
}

/// Secret handshake state machine.
///
/// Sans-IO: [`Handshake::hello`] produces the first message and
/// [`Handshake::read_message`] consumes one inbound message and returns
/// the next outbound one, so the caller decides how messages travel.
///
/// [`Handshake::receive`] and [`Handshake::reply`] split that step in two
/// for callers that act on a verified message before answering it; the
/// machine then rests in `AuthPending` or `OkayPending` in between.
pub struct Handshake {
    shared_key: Zeroizing<[u8; 32]>,
    identity: Arc<KeyPair>,
    session: Arc<KeyPair>,
    remote_identity: VerifyingKey,
    capabilities: CapabilitySet,
    state: HandshakeState,
    remote_session: Option<VerifyingKey>,
    nonce: Option<Nonce>,
    remote_nonce: Option<Nonce>,
    terms: Option<Terms>,
    authorized: Option<CapabilitySet>,
}

impl Handshake {
    /// Prepare a handshake with the remote identity learned from discovery
    #[must_use]
    pub fn new(
        shared_key: &[u8; 32],
        identity: Arc<KeyPair>,
        session: Arc<KeyPair>,
        remote_identity: VerifyingKey,
        capabilities: CapabilitySet,
    ) -> Self {
        Self {
            shared_key: Zeroizing::new(*shared_key),
            identity,
            session,
            remote_identity,
            capabilities,
            state: HandshakeState::Idle,
            remote_session: None,
            nonce: None,
            remote_nonce: None,
            terms: None,
            authorized: None,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Remote session key, once HELLO verified
    #[must_use]
    pub fn remote_session_key(&self) -> Option<&VerifyingKey> {
        self.remote_session.as_ref()
    }

    /// Produce HELLO.
    ///
    /// # Errors
    ///
    /// - [`HandshakeError::InvalidState`] unless called first
    /// - [`HandshakeError::HelloVerificationFailed`] if the remote identity
    ///   is not a usable DH key
    pub fn hello(&mut self) -> Result<Vec<u8>, HandshakeError> {
        if self.state != HandshakeState::Idle {
            return Err(HandshakeError::InvalidState(self.state.name()));
        }

        let key = match hello_key(&self.shared_key, &self.session, &self.remote_identity) {
            Ok(key) => Zeroizing::new(key),
            Err(_) => return Err(self.fail(HandshakeError::HelloVerificationFailed)),
        };
        let mac = hash::mac(&self.identity.public_bytes(), &key);

        self.nonce = Some(nonce_from_mac(&mac));
        self.state = HandshakeState::HelloSent;

        let mut message = Vec::with_capacity(MAC_SIZE + PUBLIC_KEY_SIZE);
        message.extend_from_slice(&mac);
        message.extend_from_slice(&self.session.public_bytes());
        Ok(message)
    }

    /// Consume one inbound message.
    ///
    /// # Errors
    ///
    /// Returns the [`HandshakeError`] of the stage that failed; the
    /// handshake is then in [`HandshakeState::Failed`] for good.
    pub fn read_message(&mut self, message: &[u8]) -> Result<Step, HandshakeError> {
        match self.receive(message)? {
            Some(session) => Ok(Step::Complete(session)),
            None => self.reply().map(Step::Send),
        }
    }

    /// Verify one inbound message without answering it.
    ///
    /// A verified HELLO leaves the handshake in
    /// [`HandshakeState::AuthPending`], a verified AUTH in
    /// [`HandshakeState::OkayPending`]; [`Handshake::reply`] produces the
    /// answer. A verified OKAY completes the handshake.
    ///
    /// # Errors
    ///
    /// Returns the [`HandshakeError`] of the stage that failed; the
    /// handshake is then in [`HandshakeState::Failed`] for good.
    pub fn receive(&mut self, message: &[u8]) -> Result<Option<Session>, HandshakeError> {
        let result = match self.state {
            HandshakeState::HelloSent => self.on_hello(message).map(|()| None),
            HandshakeState::AuthSent => self.on_auth(message).map(|()| None),
            HandshakeState::OkaySent => self.on_okay(message).map(Some),
            state => Err(HandshakeError::InvalidState(state.name())),
        };

        result.map_err(|e| self.fail(e))
    }

    /// Seal the answer to the message accepted by [`Handshake::receive`].
    ///
    /// # Errors
    ///
    /// [`HandshakeError::InvalidState`] unless a verified message is
    /// waiting for its answer.
    pub fn reply(&mut self) -> Result<Vec<u8>, HandshakeError> {
        let result = match self.state {
            HandshakeState::AuthPending => self
                .auth_payload()
                .and_then(|payload| self.seal_auth(&payload))
                .map(|auth| (auth, HandshakeState::AuthSent)),
            HandshakeState::OkayPending => self
                .seal_okay()
                .map(|okay| (okay, HandshakeState::OkaySent)),
            state => return Err(HandshakeError::InvalidState(state.name())),
        };

        match result {
            Ok((message, next)) => {
                self.state = next;
                Ok(message)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn fail(&mut self, error: HandshakeError) -> HandshakeError {
        debug!(state = self.state.name(), %error, "handshake failed");
        self.state = HandshakeState::Failed;
        error
    }

    fn on_hello(&mut self, message: &[u8]) -> Result<(), HandshakeError> {
        if message.len() != MAC_SIZE + PUBLIC_KEY_SIZE {
            return Err(HandshakeError::HelloVerificationFailed);
        }
        let (mac, session_key) = message.split_at(MAC_SIZE);

        let remote_session = VerifyingKey::from_slice(session_key)
            .map_err(|_| HandshakeError::HelloVerificationFailed)?;
        let key = hello_key(&self.shared_key, &self.identity, &remote_session)
            .map_err(|_| HandshakeError::HelloVerificationFailed)?;

        if !hash::mac_verify(mac, self.remote_identity.as_bytes(), &key) {
            return Err(HandshakeError::HelloVerificationFailed);
        }

        let terms = Terms::compute(
            &self.identity,
            &self.session,
            &self.remote_identity,
            &remote_session,
        )
        .map_err(|_| HandshakeError::HelloVerificationFailed)?;

        self.remote_session = Some(remote_session);
        self.remote_nonce = Some(nonce_from_mac(mac));
        self.terms = Some(terms);
        self.state = HandshakeState::AuthPending;
        debug!(remote_session = ?remote_session, "hello verified");
        Ok(())
    }

    fn terms(&self) -> Result<&Terms, HandshakeError> {
        self.terms
            .as_ref()
            .ok_or(HandshakeError::InvalidState(self.state.name()))
    }

    fn nonces(&self) -> Result<(Nonce, Nonce), HandshakeError> {
        match (self.nonce, self.remote_nonce) {
            (Some(nonce), Some(remote_nonce)) => Ok((nonce, remote_nonce)),
            _ => Err(HandshakeError::InvalidState(self.state.name())),
        }
    }

    /// `A ‖ sign(K ‖ B ‖ H(DH(a, b))) ‖ caps`
    fn auth_payload(&self) -> Result<Vec<u8>, HandshakeError> {
        let terms = self.terms()?;
        let proof = concat(&[
            &self.shared_key[..],
            self.remote_identity.as_bytes(),
            &hash::hash(terms.sessions.as_bytes()),
        ]);
        let signature = self.identity.sign(&proof);

        let mut payload = Vec::with_capacity(
            PUBLIC_KEY_SIZE + SIGNATURE_SIZE + self.capabilities.len() * crate::CAPABILITY_SIZE,
        );
        payload.extend_from_slice(&self.identity.public_bytes());
        payload.extend_from_slice(signature.as_bytes());
        payload.extend_from_slice(&self.capabilities.to_bytes());
        Ok(payload)
    }

    fn seal_auth(&self, payload: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        let terms = self.terms()?;
        let (nonce, _) = self.nonces()?;
        let key = box_key(
            AUTH_BOX_CONTEXT,
            &[
                &self.shared_key[..],
                terms.sessions.as_bytes(),
                terms.session_identity.as_bytes(),
            ],
        );
        key.encrypt(&nonce, payload, &[])
            .map_err(|_| HandshakeError::AuthVerificationFailed)
    }

    fn on_auth(&mut self, message: &[u8]) -> Result<(), HandshakeError> {
        let terms = self.terms()?;
        let (_, remote_nonce) = self.nonces()?;

        // The remote sealed under K ‖ DH(b, a) ‖ DH(b, A)
        let key = box_key(
            AUTH_BOX_CONTEXT,
            &[
                &self.shared_key[..],
                terms.sessions.as_bytes(),
                terms.identity_session.as_bytes(),
            ],
        );
        let payload = Zeroizing::new(
            key.decrypt(&remote_nonce, message, &[])
                .map_err(|_| HandshakeError::AuthDecryptFailed)?,
        );

        if payload.len() < PUBLIC_KEY_SIZE + SIGNATURE_SIZE {
            return Err(HandshakeError::AuthVerificationFailed);
        }
        let (claimed, rest) = payload.split_at(PUBLIC_KEY_SIZE);
        let (signature, capabilities) = rest.split_at(SIGNATURE_SIZE);

        if !murmur_crypto::constant_time::ct_eq(claimed, self.remote_identity.as_bytes()) {
            return Err(HandshakeError::IdentityMismatch);
        }

        let proof = concat(&[
            &self.shared_key[..],
            &self.identity.public_bytes(),
            &hash::hash(terms.sessions.as_bytes()),
        ]);
        let signature =
            Signature::from_slice(signature).map_err(|_| HandshakeError::AuthVerificationFailed)?;
        self.remote_identity
            .verify(&proof, &signature)
            .map_err(|_| HandshakeError::AuthVerificationFailed)?;

        let remote_capabilities = CapabilitySet::parse(capabilities)
            .map_err(|_| HandshakeError::AuthVerificationFailed)?;
        let authorized = self.capabilities.negotiate(&remote_capabilities)?;

        debug!(
            remote = ?self.remote_identity,
            authorized = authorized.len(),
            "auth verified"
        );
        self.authorized = Some(authorized);
        self.state = HandshakeState::OkayPending;
        Ok(())
    }

    fn seal_okay(&self) -> Result<Vec<u8>, HandshakeError> {
        let terms = self.terms()?;
        let (nonce, _) = self.nonces()?;

        let proof = concat(&[&self.shared_key[..], &hash::hash(terms.sessions.as_bytes())]);
        let signature = self.identity.sign(&proof);

        let key = box_key(
            OKAY_BOX_CONTEXT,
            &[
                &self.shared_key[..],
                terms.sessions.as_bytes(),
                terms.session_identity.as_bytes(),
                terms.identity_session.as_bytes(),
            ],
        );
        key.encrypt(&nonce, signature.as_bytes(), &[])
            .map_err(|_| HandshakeError::OkayVerificationFailed)
    }

    fn on_okay(&mut self, message: &[u8]) -> Result<Session, HandshakeError> {
        let terms = self.terms()?;
        let (nonce, remote_nonce) = self.nonces()?;

        // The remote sealed under K ‖ DH(b, a) ‖ DH(b, A) ‖ DH(B, a)
        let key = box_key(
            OKAY_BOX_CONTEXT,
            &[
                &self.shared_key[..],
                terms.sessions.as_bytes(),
                terms.identity_session.as_bytes(),
                terms.session_identity.as_bytes(),
            ],
        );
        let signature = key
            .decrypt(&remote_nonce, message, &[])
            .map_err(|_| HandshakeError::OkayVerificationFailed)?;
        let signature = Signature::from_slice(&signature)
            .map_err(|_| HandshakeError::OkayVerificationFailed)?;

        let proof = concat(&[&self.shared_key[..], &hash::hash(terms.sessions.as_bytes())]);
        self.remote_identity
            .verify(&proof, &signature)
            .map_err(|_| HandshakeError::OkayVerificationFailed)?;

        let remote_session_key = self
            .remote_session
            .ok_or(HandshakeError::InvalidState(self.state.name()))?;
        let authorized = self
            .authorized
            .clone()
            .ok_or(HandshakeError::InvalidState(self.state.name()))?;

        // Cross terms in byte order: each side lists them the other way round
        let (low, high) = {
            let a = terms.session_identity.as_bytes();
            let b = terms.identity_session.as_bytes();
            if a <= b { (a, b) } else { (b, a) }
        };
        let material = concat(&[
            &self.shared_key[..],
            terms.sessions.as_bytes(),
            low,
            high,
            &authorized.to_bytes(),
        ]);

        self.state = HandshakeState::Done;
        debug!(remote_session = ?remote_session_key, "okay verified");

        Ok(Session {
            remote_session_key,
            nonce,
            remote_nonce,
            authorized,
            key: ChainKey::from_material(material),
        })
    }
}

impl fmt::Debug for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handshake")
            .field("state", &self.state)
            .field("remote_identity", &self.remote_identity)
            .field("capabilities", &self.capabilities.len())
            .finish_non_exhaustive()
    }
}
