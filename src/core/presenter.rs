//! Out-of-band presentation of the DPP bootstrapping URI

use std::io::{self, Write};

use qrcode::{QrCode, render::unicode};
use tracing::{error, info, warn};

/// Render a URI as a terminal QR code using unicode half blocks
pub fn render_qr(uri: &str) -> Result<String, qrcode::types::QrError> {
    let code = QrCode::new(uri.as_bytes())?;
    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}

/// Presents the provisioning URI to a human operator
///
/// The URI is logged and, unless disabled, rendered as a QR code to the
/// configured writer. Nothing is cached.
pub struct UriPresenter {
    out: Box<dyn Write + Send>,
    render_qr: bool,
}

impl UriPresenter {
    pub fn new(out: Box<dyn Write + Send>, render_qr: bool) -> Self {
        Self { out, render_qr }
    }

    /// Presenter printing QR codes to stdout
    pub fn stdout(render_qr: bool) -> Self {
        Self::new(Box::new(io::stdout()), render_qr)
    }

    /// Present a URI; returns `true` if a URI was available
    pub fn present(&mut self, uri: Option<&str>) -> bool {
        let Some(uri) = uri.filter(|uri| !uri.is_empty()) else {
            warn!("DPP URI data is empty");
            return false;
        };

        info!("DPP URI: {}", uri);
        if !self.render_qr {
            return true;
        }

        match render_qr(uri) {
            Ok(qr) => {
                info!("Scan below QR Code to configure the enrollee");
                if let Err(e) = self.write_qr(&qr) {
                    error!("Failed to write QR code: {}", e);
                }
            }
            Err(e) => error!("Failed to render QR code: {}", e),
        }

        true
    }

    fn write_qr(&mut self, qr: &str) -> io::Result<()> {
        writeln!(self.out, "{}", qr)?;
        self.out.flush()
    }
}

impl std::fmt::Debug for UriPresenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UriPresenter")
            .field("render_qr", &self.render_qr)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Writer sharing its buffer with the test
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        pub(crate) fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    const URI: &str = "DPP:C:81/6;M:001122334455;V:2;K:MDkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDIgAD;;";

    #[test]
    fn test_present_renders_qr() {
        let buffer = SharedBuffer::default();
        let mut presenter = UriPresenter::new(Box::new(buffer.clone()), true);

        assert!(presenter.present(Some(URI)));

        let output = buffer.contents();
        assert!(!output.is_empty());
        assert!(output.lines().count() > 10);
        assert!(output.contains('█') || output.contains('▀') || output.contains('▄'));
    }

    #[test]
    fn test_present_without_rendering() {
        let buffer = SharedBuffer::default();
        let mut presenter = UriPresenter::new(Box::new(buffer.clone()), false);

        assert!(presenter.present(Some(URI)));
        assert!(buffer.contents().is_empty());
    }

    #[test]
    fn test_present_absent_uri() {
        let buffer = SharedBuffer::default();
        let mut presenter = UriPresenter::new(Box::new(buffer.clone()), true);

        assert!(!presenter.present(None));
        assert!(!presenter.present(Some("")));
        assert!(buffer.contents().is_empty());
    }

    #[test]
    fn test_render_qr_is_deterministic() {
        assert_eq!(render_qr(URI).unwrap(), render_qr(URI).unwrap());
    }

    #[test]
    fn test_render_qr_too_long() {
        let uri = "D".repeat(8000);
        assert!(render_qr(&uri).is_err());
    }
}
