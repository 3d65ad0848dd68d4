//! BSP protocol client: one live connection, one exchange at a time.
//!
//! ```text
//! Idle --request written--> AwaitingResponse --response read--> Idle
//!   \                              |
//!    `------- I/O failure ---------+--> Closed
//! ```
//!
//! Framing and protocol errors abort only the current exchange and return
//! the session to `Idle`. I/O errors close it, and so does a garbled length
//! prefix, since the stream can no longer be split into frames.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::cache::{ImageCache, ImageListing, ImageRecord};
use crate::error::{BspError, Result};
use crate::logger::{Logger, NoopLogger};
use crate::protocol::RequestType;
use crate::protocol_core::{decode_listing, encode_image_body, Header};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingResponse,
    Closed,
}

/// IDs returned by one listing. Consumed once; not restartable.
///
/// The listing body is one JSON document, so it is decoded in full before
/// this is handed out. Only the one-shot property holds, not laziness.
#[derive(Debug)]
pub struct ImageIds {
    inner: std::vec::IntoIter<String>,
}

impl ImageIds {
    fn new(ids: Vec<String>) -> Self {
        Self {
            inner: ids.into_iter(),
        }
    }
}

impl Iterator for ImageIds {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for ImageIds {}

pub struct Session<S = TcpStream> {
    transport: Transport<S>,
    state: SessionState,
    cache: ImageCache,
    listing: ImageListing,
    logger: Arc<dyn Logger>,
    responses_read: u64,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(transport: Transport<S>, cache: ImageCache, listing: ImageListing) -> Self {
        Self {
            transport,
            state: SessionState::Idle,
            cache,
            listing,
            logger: Arc::new(NoopLogger),
            responses_read: 0,
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer(&self) -> &str {
        self.transport.peer()
    }

    pub fn cache(&self) -> &ImageCache {
        &self.cache
    }

    pub fn listing(&self) -> &ImageListing {
        &self.listing
    }

    /// Number of responses taken off the wire, including ones that failed to
    /// decode.
    pub fn responses_read(&self) -> u64 {
        self.responses_read
    }

    fn begin(&self) -> Result<()> {
        match self.state {
            SessionState::Idle => Ok(()),
            SessionState::AwaitingResponse => Err(BspError::Busy),
            SessionState::Closed => Err(BspError::Closed),
        }
    }

    /// Settle the state after an exchange.
    async fn finish<T>(&mut self, context: &str, res: Result<T>) -> Result<T> {
        match &res {
            Ok(_) => self.state = SessionState::Idle,
            Err(e) if e.is_fatal() => {
                self.logger.fault(context, e);
                self.shutdown().await;
            }
            Err(e) => {
                self.logger.fault(context, e);
                self.state = SessionState::Idle;
            }
        }
        res
    }

    async fn read_response(&mut self) -> Result<(Header, Vec<u8>)> {
        let res = self.transport.read_frame().await;
        match &res {
            Err(e) if e.is_fatal() => {}
            _ => self.responses_read += 1,
        }
        res
    }

    async fn request(&mut self, header: &Header, body: &[u8]) -> Result<(Header, Vec<u8>)> {
        self.transport.write_frame(header, body).await?;
        self.state = SessionState::AwaitingResponse;
        self.read_response().await
    }

    /// Send one image and wait for the appliance to acknowledge it with its
    /// new ID. The image is cached and listed under that ID.
    pub async fn send_transfer(&mut self, image: &[u8]) -> Result<String> {
        self.begin()?;
        let body = encode_image_body(image);
        let header = Header::request(RequestType::Transfer, body.len());

        let res = match self.request(&header, &body).await {
            // An ack body, if any, has already been drained by read_frame
            Ok((ack, _)) => ack
                .image_id
                .ok_or_else(|| BspError::Protocol("transfer ack without ImageID".to_string())),
            Err(e) => Err(e),
        };
        let id = self.finish("transfer", res).await?;

        self.cache.put(ImageRecord::new(id.clone(), image.to_vec()));
        self.listing.push(&id);
        self.logger.transfer_done(&id, body.len());
        Ok(id)
    }

    /// Ask the appliance for every image ID it holds.
    ///
    /// The body is one JSON document; a `Content-Length` of 0 means no images
    /// and no body read is attempted.
    pub async fn request_all(&mut self) -> Result<ImageIds> {
        self.begin()?;
        let header = Header::request(RequestType::RequestAll, 0);

        let res = match self.request(&header, &[]).await {
            Ok((resp, _)) if resp.content_length == 0 => Ok(Vec::new()),
            Ok((_, body)) => decode_listing(&body),
            Err(e) => Err(e),
        };
        let ids = self.finish("request_all", res).await?;

        self.listing.replace(ids.clone());
        self.logger.listing_done(ids.len());
        Ok(ImageIds::new(ids))
    }

    /// Fire-and-forget delete. The ID leaves the local listing and cache
    /// without waiting for any acknowledgement.
    pub async fn delete(&mut self, id: &str) -> Result<()> {
        self.begin()?;
        self.listing.remove(id);
        self.cache.remove(id);

        let header = Header::request(RequestType::Delete, 0).with_image_id(id);
        let res = self.transport.write_frame(&header, &[]).await;
        self.finish("delete", res).await?;
        self.logger.delete_sent(id);
        Ok(())
    }

    /// Wait for inbound data while idle. Returns the unsolicited byte, or
    /// `None` once the peer has closed (the session is then `Closed`).
    pub async fn probe(&mut self) -> Result<Option<u8>> {
        self.begin()?;
        match self.transport.probe().await {
            Ok(Some(byte)) => {
                self.logger.unsolicited(byte);
                Ok(Some(byte))
            }
            Ok(None) => {
                self.shutdown().await;
                Ok(None)
            }
            Err(e) => {
                self.logger.fault("probe", &e);
                self.shutdown().await;
                Err(e)
            }
        }
    }

    async fn shutdown(&mut self) {
        if self.state != SessionState::Closed {
            self.transport.close().await;
            self.state = SessionState::Closed;
            self.logger.closed(self.transport.peer());
        }
    }

    /// Close the connection. Idempotent.
    pub async fn close(&mut self) {
        self.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol_core::encode_header;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use tokio::io::{duplex, DuplexStream};
    use tokio::time::{timeout, Duration};

    fn pair() -> (Session<DuplexStream>, Transport<DuplexStream>) {
        let (a, b) = duplex(64 * 1024);
        let session = Session::new(
            Transport::from_stream(a, "frame"),
            ImageCache::new(),
            ImageListing::new(),
        );
        (session, Transport::from_stream(b, "appliance"))
    }

    fn ack(id: &str) -> Header {
        Header {
            request_type: None,
            content_length: 0,
            image_id: Some(id.to_string()),
        }
    }

    #[tokio::test]
    async fn test_send_transfer_acknowledged() {
        let (mut session, mut appliance) = pair();
        let image = vec![0xD8u8; 3000];
        let expected = image.clone();

        let server = tokio::spawn(async move {
            let (req, body) = appliance.read_frame().await.unwrap();
            assert_eq!(req.request_type, Some(RequestType::Transfer));
            assert_eq!(req.content_length, BASE64.encode(&expected).len());
            assert_eq!(BASE64.decode(&body).unwrap(), expected);
            appliance.write_frame(&ack("IMG_0001.jpg"), &[]).await.unwrap();
            appliance
        });

        let id = session.send_transfer(&image).await.unwrap();
        assert_eq!(id, "IMG_0001.jpg");
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.cache().get("IMG_0001.jpg").unwrap().bytes, image);
        assert!(session.listing().contains("IMG_0001.jpg"));
        assert_eq!(session.responses_read(), 1);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_request_all_empty_skips_body_read() {
        let (mut session, mut appliance) = pair();
        let server = tokio::spawn(async move {
            let (req, _) = appliance.read_frame().await.unwrap();
            assert_eq!(req.request_type, Some(RequestType::RequestAll));
            assert_eq!(req.content_length, 0);
            appliance
                .write_frame(&Header::default(), &[])
                .await
                .unwrap();
            // Keep the stream open; a body read would hang
            appliance
        });

        let ids = timeout(Duration::from_secs(2), session.request_all())
            .await
            .expect("request_all waited for a body")
            .unwrap();
        assert_eq!(ids.count(), 0);
        assert_eq!(session.state(), SessionState::Idle);
        let _appliance = server.await.unwrap();
    }

    #[tokio::test]
    async fn test_request_all_listing() {
        let (mut session, mut appliance) = pair();
        session.listing().replace(vec!["stale.jpg".into()]);

        tokio::spawn(async move {
            appliance.read_frame().await.unwrap();
            let body = br#"{"0": "a.jpg", "1": "b.jpg", "2": "c.jpg"}"#;
            let resp = Header {
                content_length: body.len(),
                ..Header::default()
            };
            appliance.write_frame(&resp, body).await.unwrap();
            appliance
        });

        let ids = session.request_all().await.unwrap();
        assert_eq!(ids.len(), 3);
        let mut ids: Vec<String> = ids.collect();
        ids.sort();
        assert_eq!(ids, vec!["a.jpg", "b.jpg", "c.jpg"]);
        assert!(!session.listing().contains("stale.jpg"));
        assert_eq!(session.listing().len(), 3);
    }

    #[tokio::test]
    async fn test_bad_header_keeps_session_usable() {
        let (mut session, mut appliance) = pair();
        tokio::spawn(async move {
            appliance.read_frame().await.unwrap();
            // Valid prefix, malformed JSON
            appliance.write_all(b"005{nope").await.unwrap();

            appliance.read_frame().await.unwrap();
            appliance.write_frame(&ack("IMG_0002.jpg"), &[]).await.unwrap();
            appliance
        });

        assert!(matches!(
            session.request_all().await,
            Err(BspError::Protocol(_))
        ));
        assert_eq!(session.state(), SessionState::Idle);

        let id = session.send_transfer(b"jpeg").await.unwrap();
        assert_eq!(id, "IMG_0002.jpg");
        assert_eq!(session.responses_read(), 2);
    }

    #[tokio::test]
    async fn test_oversized_body_is_drained() {
        use crate::protocol::MAX_BODY_SIZE;

        let (mut session, mut appliance) = pair();
        tokio::spawn(async move {
            appliance.read_frame().await.unwrap();
            let huge = Header {
                content_length: MAX_BODY_SIZE + 1,
                ..Header::default()
            };
            appliance.write_all(&encode_header(&huge).unwrap()).await.unwrap();
            // The refused body starts with something that parses as an ack
            let decoy = encode_header(&ack("decoy.jpg")).unwrap();
            appliance.write_all(&decoy).await.unwrap();
            let filler = vec![b' '; 1024 * 1024];
            let mut left = MAX_BODY_SIZE + 1 - decoy.len();
            while left > 0 {
                let n = left.min(filler.len());
                appliance.write_all(&filler[..n]).await.unwrap();
                left -= n;
            }

            appliance.read_frame().await.unwrap();
            appliance.write_frame(&ack("IMG_0004.jpg"), &[]).await.unwrap();
            appliance
        });

        assert!(matches!(
            session.request_all().await,
            Err(BspError::Framing(_))
        ));
        assert_eq!(session.state(), SessionState::Idle);

        let id = session.send_transfer(b"jpeg").await.unwrap();
        assert_eq!(id, "IMG_0004.jpg");
        assert!(!session.cache().contains("decoy.jpg"));
        assert!(!session.listing().contains("decoy.jpg"));
    }

    #[tokio::test]
    async fn test_garbled_prefix_closes_session() {
        let (mut session, mut appliance) = pair();
        tokio::spawn(async move {
            appliance.read_frame().await.unwrap();
            appliance.write_all(br#"x10{"ImageID":"a"}"#).await.unwrap();
            appliance
        });

        assert!(matches!(
            session.request_all().await,
            Err(BspError::Desync(_))
        ));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.responses_read(), 0);
        assert!(matches!(
            session.send_transfer(b"jpeg").await,
            Err(BspError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_ack_without_image_id() {
        let (mut session, mut appliance) = pair();
        tokio::spawn(async move {
            appliance.read_frame().await.unwrap();
            appliance.write_frame(&Header::default(), &[]).await.unwrap();
            appliance
        });

        assert!(matches!(
            session.send_transfer(b"jpeg").await,
            Err(BspError::Protocol(_))
        ));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.cache().is_empty());
    }

    #[tokio::test]
    async fn test_peer_close_mid_response_closes_session() {
        let (mut session, mut appliance) = pair();
        tokio::spawn(async move {
            appliance.read_frame().await.unwrap();
            let hdr = encode_header(&ack("IMG_0003.jpg")).unwrap();
            // Half a header, then hang up
            appliance.write_all(&hdr[..hdr.len() / 2]).await.unwrap();
            appliance.close().await;
        });

        assert!(matches!(
            session.send_transfer(b"jpeg").await,
            Err(BspError::Io(_))
        ));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(
            session.request_all().await,
            Err(BspError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_delete_is_fire_and_forget() {
        let (mut session, mut appliance) = pair();
        session.listing().replace(vec!["a.jpg".into(), "b.jpg".into()]);
        session.cache().put(ImageRecord::new("a.jpg", vec![1]));

        session.delete("a.jpg").await.unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.listing().snapshot(), vec!["b.jpg"]);
        assert!(session.cache().get("a.jpg").is_none());
        assert_eq!(session.responses_read(), 0);

        let (req, body) = appliance.read_frame().await.unwrap();
        assert_eq!(req.request_type, Some(RequestType::Delete));
        assert_eq!(req.image_id.as_deref(), Some("a.jpg"));
        assert_eq!(req.content_length, 0);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_exchange_leaves_session_busy() {
        let (mut session, mut appliance) = pair();
        let server = tokio::spawn(async move {
            // Read the request, never answer
            appliance.read_frame().await.unwrap();
            appliance
        });

        let abandoned = timeout(Duration::from_millis(100), session.request_all()).await;
        assert!(abandoned.is_err());
        assert_eq!(session.state(), SessionState::AwaitingResponse);
        assert!(matches!(session.send_transfer(b"x").await, Err(BspError::Busy)));
        let _appliance = server.await.unwrap();
    }

    #[tokio::test]
    async fn test_probe_reports_peer_close() {
        let (mut session, appliance) = pair();
        drop(appliance);
        assert_eq!(session.probe().await.unwrap(), None);
        assert_eq!(session.state(), SessionState::Closed);
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
    }
}
