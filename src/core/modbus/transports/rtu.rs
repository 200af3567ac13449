use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use log::{debug, trace};
use serial2_tokio::{CharSize, FlowControl, Parity, SerialPort, StopBits};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::time::error::Elapsed;
use tokio_modbus::client::{rtu, Context};
use tokio_modbus::prelude::{Reader, Slave, SlaveContext, Writer};

use crate::prelude::*;

/// Modbus-RTU over any byte stream, normally a [`SerialPort`].
///
/// Framing and checksums are handled by `tokio_modbus`. Requests are strictly
/// sequential: a request is written, then exactly one reply is awaited for at
/// most `timeout` before the next request may be issued. After a failed
/// exchange the line is drained until it has been quiet for `timeout`, so a
/// reply arriving late is never taken as the answer to the next request.
pub struct RtuTransport<S> {
    context: Option<Context>,
    line: Line<S>,
    timeout: Duration,
    stale: bool,
}

impl<S> fmt::Debug for RtuTransport<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtuTransport")
            .field("open", &self.context.is_some())
            .field("timeout", &self.timeout)
            .field("stale", &self.stale)
            .finish()
    }
}

impl<S> RtuTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(stream: S, timeout: Duration) -> RtuTransport<S> {
        let line = Line::new(stream);
        RtuTransport {
            context: Some(rtu::attach_slave(line.clone(), Slave(0))),
            line,
            timeout,
            stale: false,
        }
    }

    /// Discards whatever is still arriving from an earlier exchange.
    async fn settle(&mut self) -> Result<(), Error> {
        if !self.stale {
            return Ok(());
        }

        let mut scratch = [0u8; 64];
        loop {
            match tokio::time::timeout(self.timeout, self.line.read(&mut scratch)).await {
                Err(_) | Ok(Ok(0)) => break,
                Ok(Ok(n)) => trace!("Discarding stale bytes {:02X?}", &scratch[..n]),
                Ok(Err(err)) => return Err(err.into()),
            }
        }

        self.stale = false;
        Ok(())
    }

    fn context(&mut self, slave: SlaveId) -> Result<&mut Context, Error> {
        let context = self.context.as_mut().ok_or(Error::Closed)?;
        context.set_slave(Slave(slave));
        Ok(context)
    }

    fn finish<R>(&mut self, outcome: Result<tokio_modbus::Result<R>, Elapsed>) -> Result<R, Error> {
        let result = match outcome {
            Err(_) => Err(Error::Timeout(self.timeout)),
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(code))) => Err(Error::Exception(code.into())),
            Ok(Err(err)) => Err(err.into()),
        };

        // An exception reply is a complete frame; anything else may leave bytes in flight.
        self.stale = result
            .as_ref()
            .is_err_and(|err| !matches!(err, Error::Exception(_)));
        result
    }
}

impl<S> Transport for RtuTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn read(&mut self, slave: SlaveId, function: ReadFunction) -> Result<Reading, Error> {
        self.settle().await?;
        let timeout = self.timeout;
        let context = self.context(slave)?;

        let reading = match function {
            ReadFunction::Coil(addr) => {
                let outcome = tokio::time::timeout(timeout, context.read_coils(addr, 1)).await;
                self.finish(outcome)?.first().copied().map(Reading::Bit)
            }
            ReadFunction::HoldingRegister(addr) => {
                let outcome =
                    tokio::time::timeout(timeout, context.read_holding_registers(addr, 1)).await;
                self.finish(outcome)?.first().copied().map(Reading::Word)
            }
            ReadFunction::InputRegister(addr) => {
                let outcome =
                    tokio::time::timeout(timeout, context.read_input_registers(addr, 1)).await;
                self.finish(outcome)?.first().copied().map(Reading::Word)
            }
        };

        trace!("Received {reading:?}");
        reading.ok_or_else(|| Reason::UnexpectedReplySize.into())
    }

    async fn write(&mut self, slave: SlaveId, function: WriteFunction) -> Result<(), Error> {
        self.settle().await?;
        let timeout = self.timeout;
        let context = self.context(slave)?;

        let outcome = match function {
            WriteFunction::SingleCoil(addr, value) => {
                tokio::time::timeout(timeout, context.write_single_coil(addr, value)).await
            }
            WriteFunction::SingleRegister(addr, value) => {
                tokio::time::timeout(timeout, context.write_single_register(addr, value)).await
            }
        };
        self.finish(outcome)
    }

    async fn close(&mut self) -> Result<(), Error> {
        if self.context.take().is_some() {
            debug!("Closing RTU transport");
        }
        Ok(())
    }
}

/// A handle to the serial line shared between the Modbus context and the
/// transport, which reads from it directly while draining.
struct Line<S>(Arc<Mutex<S>>);

impl<S> Line<S> {
    fn new(stream: S) -> Line<S> {
        Line(Arc::new(Mutex::new(stream)))
    }

    fn poll_with<R>(
        &self,
        poll: impl FnOnce(Pin<&mut S>) -> Poll<io::Result<R>>,
    ) -> Poll<io::Result<R>>
    where
        S: Unpin,
    {
        match self.0.lock() {
            Ok(mut stream) => poll(Pin::new(&mut *stream)),
            Err(_) => Poll::Ready(Err(io::Error::other("serial line lock poisoned"))),
        }
    }
}

impl<S> Clone for Line<S> {
    fn clone(&self) -> Self {
        Line(Arc::clone(&self.0))
    }
}

impl<S> fmt::Debug for Line<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Line")
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Line<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.poll_with(|stream| stream.poll_read(cx, buf))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Line<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.poll_with(|stream| stream.poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        self.poll_with(|stream| stream.poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        self.poll_with(|stream| stream.poll_shutdown(cx))
    }
}

/// Connects to a bridge over a local serial port, 8N1 without flow control.
///
/// ```no_run
/// use dacmaster::prelude::*;
///
/// # async fn docs() {
/// let settings = SerialSettings::new("/dev/ttyUSB0", 9600, 0.3);
/// let session = DacMaster::connect::<Rtu>(0, &settings, RegisterLayout::default())
///     .await
///     .expect("Must open port");
/// # }
/// ```
pub struct Rtu;

impl Connect for Rtu {
    type Transport = RtuTransport<SerialPort>;

    async fn connect(
        settings: &SerialSettings,
        _layout: RegisterLayout,
    ) -> Result<Self::Transport, Error> {
        let rate = settings.baudrate;
        let port = SerialPort::open(&settings.port, |mut serial: serial2_tokio::Settings| {
            serial.set_raw();
            serial.set_baud_rate(rate)?;
            serial.set_char_size(CharSize::Bits8);
            serial.set_stop_bits(StopBits::One);
            serial.set_parity(Parity::None);
            serial.set_flow_control(FlowControl::None);
            Ok(serial)
        })?;

        debug!("Opened {} at {} baud", settings.port, rate);
        Ok(RtuTransport::new(port, settings.timeout()))
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use crc::{Crc, CRC_16_MODBUS};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    use super::*;

    const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

    fn framed(body: &[u8]) -> Vec<u8> {
        let mut frame = body.to_vec();
        frame.extend_from_slice(&CRC_MODBUS.checksum(body).to_le_bytes());
        frame
    }

    fn setup(timeout_ms: u64) -> (RtuTransport<DuplexStream>, DuplexStream) {
        let (client, bridge) = tokio::io::duplex(256);
        (RtuTransport::new(client, Duration::from_millis(timeout_ms)), bridge)
    }

    async fn request(bridge: &mut DuplexStream) -> [u8; 8] {
        let mut request = [0u8; 8];
        bridge.read_exact(&mut request).await.expect("Must read request");
        request
    }

    #[tokio::test]
    async fn request_frame_matches_reference() {
        let (mut transport, mut bridge) = setup(500);

        let join = tokio::spawn(async move {
            let request = request(&mut bridge).await;
            assert_eq!(request, [0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]);

            bridge
                .write_all(&framed(&[0x01, 0x03, 0x02, 0x00, 0x2A]))
                .await
                .expect("Must write");
            bridge
        });

        assert_eq!(transport.read_holding_register(1, 0).await.expect("Must read"), 42);
        join.await.expect("Bridge task panicked");
    }

    #[tokio::test]
    async fn reads_holding_register() {
        let (mut transport, mut bridge) = setup(500);

        let join = tokio::spawn(async move {
            let request = request(&mut bridge).await;
            assert_eq!(&request[..6], &[0x00, 0x03, 0x00, 0x07, 0x00, 0x01]);

            bridge
                .write_all(&framed(&[0x00, 0x03, 0x02, 0x0F, 0xFF]))
                .await
                .expect("Must write");
            bridge
        });

        let value = transport
            .read_holding_register(0, 7)
            .await
            .expect("Must read");
        assert_eq!(value, 4095);

        join.await.expect("Bridge task panicked");
    }

    #[tokio::test]
    async fn reply_split_across_writes() {
        let (mut transport, mut bridge) = setup(500);

        let join = tokio::spawn(async move {
            request(&mut bridge).await;

            let reply = framed(&[0x00, 0x01, 0x01, 0x01]);
            let (head, tail) = reply.split_at(2);
            bridge.write_all(head).await.expect("Must write");
            tokio::time::sleep(Duration::from_millis(20)).await;
            bridge.write_all(tail).await.expect("Must write");
            bridge
        });

        assert!(transport.read_bit(0, 2).await.expect("Must read"));
        join.await.expect("Bridge task panicked");
    }

    #[tokio::test]
    async fn reads_input_register() {
        let (mut transport, mut bridge) = setup(500);

        let join = tokio::spawn(async move {
            let request = request(&mut bridge).await;
            assert_eq!(&request[..6], &[0x00, 0x04, 0x00, 0x41, 0x00, 0x01]);

            bridge
                .write_all(&framed(&[0x00, 0x04, 0x02, 0x80, 0x00]))
                .await
                .expect("Must write");
            bridge
        });

        let value = transport.read_input_register(0, 65).await.expect("Must read");
        assert_eq!(value, 0x8000);
        join.await.expect("Bridge task panicked");
    }

    #[tokio::test]
    async fn write_register_checks_echo() {
        let (mut transport, mut bridge) = setup(500);

        let join = tokio::spawn(async move {
            let request = request(&mut bridge).await;
            assert_eq!(&request[..6], &[0x00, 0x06, 0x00, 0x03, 0x03, 0x55]);
            // A well-behaved bridge echoes the request verbatim.
            bridge.write_all(&request).await.expect("Must write");
            bridge
        });

        transport.write_register(0, 3, 853).await.expect("Must write");
        join.await.expect("Bridge task panicked");
    }

    #[tokio::test]
    async fn write_coil_sends_on_value() {
        let (mut transport, mut bridge) = setup(500);

        let join = tokio::spawn(async move {
            let request = request(&mut bridge).await;
            assert_eq!(&request[..6], &[0x00, 0x05, 0x00, 0x06, 0xFF, 0x00]);
            bridge.write_all(&request).await.expect("Must write");
            bridge
        });

        transport.write_bit(0, 6, true).await.expect("Must write");
        join.await.expect("Bridge task panicked");
    }

    #[tokio::test]
    async fn exception_reply_is_decoded() {
        let (mut transport, mut bridge) = setup(500);

        let join = tokio::spawn(async move {
            request(&mut bridge).await;
            bridge
                .write_all(&framed(&[0x00, 0x83, 0x02]))
                .await
                .expect("Must write");
            bridge
        });

        let result = transport.read_holding_register(0, 900).await;
        assert!(
            matches!(result, Err(Error::Exception(ExceptionCode::IllegalDataAddress))),
            "result={result:?}"
        );
        join.await.expect("Bridge task panicked");
    }

    #[tokio::test]
    async fn late_reply_is_not_taken_for_the_next_one() {
        let (mut transport, mut bridge) = setup(50);

        let join = tokio::spawn(async move {
            request(&mut bridge).await;
            tokio::time::sleep(Duration::from_millis(80)).await;
            bridge
                .write_all(&framed(&[0x00, 0x03, 0x02, 0x04, 0x57]))
                .await
                .expect("Must write");

            let second = request(&mut bridge).await;
            assert_eq!(&second[..6], &[0x00, 0x03, 0x00, 0x02, 0x00, 0x01]);
            bridge
                .write_all(&framed(&[0x00, 0x03, 0x02, 0x08, 0xAE]))
                .await
                .expect("Must write");
            bridge
        });

        let first = transport.read_holding_register(0, 1).await;
        assert!(matches!(first, Err(Error::Timeout(_))), "first={first:?}");

        let second = transport.read_holding_register(0, 2).await.expect("Must read");
        assert_eq!(second, 2222);

        join.await.expect("Bridge task panicked");
    }

    #[tokio::test]
    async fn silent_bridge_times_out() {
        let (mut transport, _bridge) = setup(50);

        let result = transport.read_holding_register(0, 0).await;
        assert!(matches!(result, Err(Error::Timeout(_))), "result={result:?}");
    }

    #[tokio::test]
    async fn closed_transport_refuses_requests() {
        let (mut transport, _bridge) = setup(50);

        transport.close().await.expect("Must close");
        let result = transport.write_bit(0, 0, true).await;
        assert!(matches!(result, Err(Error::Closed)), "result={result:?}");
    }
}
