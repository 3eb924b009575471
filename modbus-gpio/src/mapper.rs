use std::net::SocketAddr;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::backend::GpioBackend;
use crate::constants::limits;
use crate::error::ModbusError;
use crate::registry::PinRegistry;

/// A registry shared between the connection tasks, guarded by a reader/writer lock
pub type SharedRegistry<B> = Arc<RwLock<PinRegistry<B>>>;

/// Wrap a configured registry so that it can be shared with a [`RequestMapper`]
pub fn share<B: GpioBackend>(registry: PinRegistry<B>) -> SharedRegistry<B> {
    Arc::new(RwLock::new(registry))
}

/// Decoded coil request, either a read or a write
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoilsRequest {
    /// unit id the request is addressed to
    pub unit_id: u8,
    /// first coil address
    pub addr: u16,
    /// number of coils
    pub quantity: u16,
    /// true for writes
    pub is_write: bool,
    /// values to write, empty for reads
    pub args: Vec<bool>,
    /// peer that sent the request
    pub client_addr: SocketAddr,
}

impl CoilsRequest {
    /// Read `quantity` coils starting at `addr`
    pub fn read(unit_id: u8, addr: u16, quantity: u16, client_addr: SocketAddr) -> Self {
        Self {
            unit_id,
            addr,
            quantity,
            is_write: false,
            args: Vec::new(),
            client_addr,
        }
    }

    /// Write `values` to consecutive coils starting at `addr`
    pub fn write(unit_id: u8, addr: u16, values: Vec<bool>, client_addr: SocketAddr) -> Self {
        Self {
            unit_id,
            addr,
            quantity: u16::try_from(values.len()).unwrap_or(u16::MAX),
            is_write: true,
            args: values,
            client_addr,
        }
    }
}

/// Decoded discrete input read request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiscreteInputsRequest {
    /// unit id the request is addressed to
    pub unit_id: u8,
    /// first input address
    pub addr: u16,
    /// number of inputs
    pub quantity: u16,
    /// peer that sent the request
    pub client_addr: SocketAddr,
}

/// Decoded holding or input register request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistersRequest {
    /// unit id the request is addressed to
    pub unit_id: u8,
    /// first register address
    pub addr: u16,
    /// number of registers
    pub quantity: u16,
    /// true for writes
    pub is_write: bool,
    /// values to write, empty for reads
    pub args: Vec<u16>,
    /// peer that sent the request
    pub client_addr: SocketAddr,
}

/// Translates Modbus requests into [`PinRegistry`] operations
///
/// Every request is checked against the served unit id, the single point
/// quantity and the access permission of the pin before the registry is
/// touched. Reads hold the shared lock and writes hold the exclusive lock for
/// the whole check-and-access sequence.
#[derive(Debug)]
pub struct RequestMapper<B: GpioBackend> {
    registry: SharedRegistry<B>,
    unit_id: u8,
}

impl<B: GpioBackend> Clone for RequestMapper<B> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            unit_id: self.unit_id,
        }
    }
}

impl<B: GpioBackend> RequestMapper<B> {
    /// Create a mapper answering requests for `unit_id`
    pub fn new(registry: SharedRegistry<B>, unit_id: u8) -> Self {
        Self { registry, unit_id }
    }

    /// The registry requests are applied to
    pub fn registry(&self) -> &SharedRegistry<B> {
        &self.registry
    }

    /// Unit id this mapper answers
    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    /// Read or write a single coil
    pub fn handle_coils(&self, req: &CoilsRequest) -> Result<Vec<bool>, ModbusError> {
        tracing::debug!(
            "coils request from {}: unit: {} addr: {} quantity: {} write: {}",
            req.client_addr,
            req.unit_id,
            req.addr,
            req.quantity,
            req.is_write
        );
        self.validate(req.unit_id, req.quantity)?;
        let pin = pin_address(req.addr)?;

        if req.is_write {
            let &[value] = req.args.as_slice() else {
                tracing::warn!("coil write with {} values", req.args.len());
                return Err(ModbusError::IllegalDataValue);
            };
            let mut registry = self.write()?;
            check_allowed(&*registry, pin)?;
            registry
                .set_coil(pin, value)
                .map_err(|err| device_failure(pin, err))?;
            tracing::info!("{} set coil {pin} to {value}", req.client_addr);
            Ok(Vec::new())
        } else {
            let registry = self.read()?;
            check_allowed(&*registry, pin)?;
            let value = registry.get_coil(pin).map_err(|err| device_failure(pin, err))?;
            Ok(vec![value])
        }
    }

    /// Read a single discrete input
    pub fn handle_discrete_inputs(
        &self,
        req: &DiscreteInputsRequest,
    ) -> Result<Vec<bool>, ModbusError> {
        tracing::debug!(
            "discrete inputs request from {}: unit: {} addr: {} quantity: {}",
            req.client_addr,
            req.unit_id,
            req.addr,
            req.quantity
        );
        self.validate(req.unit_id, req.quantity)?;
        let pin = pin_address(req.addr)?;

        let registry = self.read()?;
        check_allowed(&*registry, pin)?;
        let value = registry
            .get_discrete_input(pin)
            .map_err(|err| device_failure(pin, err))?;
        Ok(vec![value])
    }

    /// Holding registers are not mapped to any pin
    pub fn handle_holding_registers(
        &self,
        req: &RegistersRequest,
    ) -> Result<Vec<u16>, ModbusError> {
        tracing::debug!(
            "holding registers request from {} rejected",
            req.client_addr
        );
        Err(ModbusError::IllegalFunction)
    }

    /// Input registers are not mapped to any pin
    pub fn handle_input_registers(&self, req: &RegistersRequest) -> Result<Vec<u16>, ModbusError> {
        tracing::debug!("input registers request from {} rejected", req.client_addr);
        Err(ModbusError::IllegalFunction)
    }

    fn validate(&self, unit_id: u8, quantity: u16) -> Result<(), ModbusError> {
        if unit_id != self.unit_id {
            tracing::warn!("unit id must be {}, was {}", self.unit_id, unit_id);
            return Err(ModbusError::BadUnitId(unit_id));
        }
        if quantity != limits::QUANTITY {
            tracing::warn!("only requests with a quantity of 1 are allowed, was {quantity}");
            return Err(ModbusError::IllegalDataValue);
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, PinRegistry<B>>, ModbusError> {
        self.registry.read().map_err(|_| {
            tracing::error!("pin registry lock poisoned");
            ModbusError::ServerDeviceFailure
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, PinRegistry<B>>, ModbusError> {
        self.registry.write().map_err(|_| {
            tracing::error!("pin registry lock poisoned");
            ModbusError::ServerDeviceFailure
        })
    }
}

fn pin_address(addr: u16) -> Result<u8, ModbusError> {
    u8::try_from(addr).map_err(|_| {
        tracing::warn!("address {addr} is outside of the pin range");
        ModbusError::IllegalDataAddress(addr)
    })
}

fn device_failure<E>(pin: u8, err: E) -> ModbusError
where
    E: std::fmt::Display,
    ModbusError: From<E>,
{
    tracing::error!("access to pin {pin} failed: {err}");
    ModbusError::from(err)
}

fn check_allowed<B: GpioBackend>(registry: &PinRegistry<B>, pin: u8) -> Result<(), ModbusError> {
    if registry.is_allowed(pin) {
        Ok(())
    } else {
        tracing::warn!("pin {pin} is not allowed");
        Err(ModbusError::IllegalDataAddress(u16::from(pin)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::simulated::SimulatedBackend;
    use crate::backend::Level;
    use crate::error::ReadError;
    use crate::pin::PullMode;
    use std::sync::Mutex;

    const UNIT: u8 = 255;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, String) {
        let logs = Captured::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let result = tracing::subscriber::with_default(subscriber, f);
        let text = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        (result, text)
    }

    fn client() -> SocketAddr {
        "192.168.1.20:50000".parse().unwrap()
    }

    // coil 17 and pull-up input 6 allowed, coil 18 denied
    fn setup() -> (RequestMapper<SimulatedBackend>, SimulatedBackend) {
        let board = SimulatedBackend::new();
        let mut registry = PinRegistry::new(board.clone());
        registry.open().unwrap();
        registry.set_pin_as_coil(17).unwrap();
        registry.allow(17).unwrap();
        registry.set_pin_as_coil(18).unwrap();
        registry
            .set_pin_as_discrete_input(6, PullMode::PullUp)
            .unwrap();
        registry.allow(6).unwrap();
        (RequestMapper::new(share(registry), UNIT), board)
    }

    fn read_input(unit_id: u8, addr: u16, quantity: u16) -> DiscreteInputsRequest {
        DiscreteInputsRequest {
            unit_id,
            addr,
            quantity,
            client_addr: client(),
        }
    }

    #[test]
    fn writes_and_reads_an_allowed_coil() {
        let (mapper, board) = setup();
        let write = CoilsRequest::write(UNIT, 17, vec![true], client());
        assert_eq!(mapper.handle_coils(&write), Ok(vec![]));
        assert_eq!(board.level(17), Some(Level::High));

        let read = CoilsRequest::read(UNIT, 17, 1, client());
        assert_eq!(mapper.handle_coils(&read), Ok(vec![true]));

        let write = CoilsRequest::write(UNIT, 17, vec![false], client());
        mapper.handle_coils(&write).unwrap();
        assert_eq!(mapper.handle_coils(&read), Ok(vec![false]));
    }

    #[test]
    fn wrong_unit_id_never_reaches_the_registry() {
        let (mapper, board) = setup();
        let write = CoilsRequest::write(1, 17, vec![true], client());
        assert_eq!(mapper.handle_coils(&write), Err(ModbusError::BadUnitId(1)));
        assert_eq!(board.level(17), Some(Level::Low));

        assert_eq!(
            mapper.handle_discrete_inputs(&read_input(0, 6, 1)),
            Err(ModbusError::BadUnitId(0))
        );
    }

    #[test]
    fn only_single_point_requests_are_accepted() {
        let (mapper, board) = setup();
        let write = CoilsRequest::write(UNIT, 17, vec![true, true], client());
        assert_eq!(write.quantity, 2);
        assert_eq!(mapper.handle_coils(&write), Err(ModbusError::IllegalDataValue));
        assert_eq!(board.level(17), Some(Level::Low));

        // quantity is checked before permission
        let read = CoilsRequest::read(UNIT, 18, 2, client());
        assert_eq!(mapper.handle_coils(&read), Err(ModbusError::IllegalDataValue));
        let read = CoilsRequest::read(UNIT, 17, 0, client());
        assert_eq!(mapper.handle_coils(&read), Err(ModbusError::IllegalDataValue));

        assert_eq!(
            mapper.handle_discrete_inputs(&read_input(UNIT, 6, 8)),
            Err(ModbusError::IllegalDataValue)
        );
    }

    #[test]
    fn write_with_missing_value_is_rejected() {
        let (mapper, _) = setup();
        let mut write = CoilsRequest::write(UNIT, 17, vec![], client());
        write.quantity = 1;
        assert_eq!(mapper.handle_coils(&write), Err(ModbusError::IllegalDataValue));
    }

    #[test]
    fn denied_pins_are_illegal_addresses() {
        let (mapper, board) = setup();
        let write = CoilsRequest::write(UNIT, 18, vec![true], client());
        assert_eq!(
            mapper.handle_coils(&write),
            Err(ModbusError::IllegalDataAddress(18))
        );
        assert_eq!(board.level(18), Some(Level::Low));

        let read = CoilsRequest::read(UNIT, 18, 1, client());
        assert_eq!(
            mapper.handle_coils(&read),
            Err(ModbusError::IllegalDataAddress(18))
        );
    }

    #[test]
    fn unconfigured_and_out_of_range_addresses_are_illegal() {
        let (mapper, _) = setup();
        let read = CoilsRequest::read(UNIT, 40, 1, client());
        assert_eq!(
            mapper.handle_coils(&read),
            Err(ModbusError::IllegalDataAddress(40))
        );
        let read = CoilsRequest::read(UNIT, 256 + 17, 1, client());
        assert_eq!(
            mapper.handle_coils(&read),
            Err(ModbusError::IllegalDataAddress(273))
        );
        assert_eq!(
            mapper.handle_discrete_inputs(&read_input(UNIT, 1000, 1)),
            Err(ModbusError::IllegalDataAddress(1000))
        );
    }

    #[test]
    fn reads_pull_up_discrete_input() {
        let (mapper, board) = setup();
        assert_eq!(
            mapper.handle_discrete_inputs(&read_input(UNIT, 6, 1)),
            Ok(vec![false])
        );
        board.drive(6, Level::Low);
        assert_eq!(
            mapper.handle_discrete_inputs(&read_input(UNIT, 6, 1)),
            Ok(vec![true])
        );
    }

    #[test]
    fn registry_failures_are_device_failures() {
        let (mapper, board) = setup();
        // coil 17 has no pull mode
        assert_eq!(
            mapper.handle_discrete_inputs(&read_input(UNIT, 17, 1)),
            Err(ModbusError::ServerDeviceFailure)
        );
        // input 6 cannot be driven
        let write = CoilsRequest::write(UNIT, 6, vec![true], client());
        assert_eq!(
            mapper.handle_coils(&write),
            Err(ModbusError::ServerDeviceFailure)
        );

        board.inject_read_fault(6);
        assert_eq!(
            mapper.handle_discrete_inputs(&read_input(UNIT, 6, 1)),
            Err(ModbusError::ServerDeviceFailure)
        );
        // other pins are unaffected
        let read = CoilsRequest::read(UNIT, 17, 1, client());
        assert_eq!(mapper.handle_coils(&read), Ok(vec![false]));
    }

    #[test]
    fn device_failures_are_logged_once_by_the_mapper() {
        let (mapper, board) = setup();
        board.inject_read_fault(6);
        let request = read_input(UNIT, 6, 1);
        let (result, logs) = capture_logs(|| mapper.handle_discrete_inputs(&request));
        assert_eq!(result, Err(ModbusError::ServerDeviceFailure));
        assert_eq!(logs.matches("access to pin 6 failed").count(), 1);

        let (converted, logs) = capture_logs(|| ModbusError::from(ReadError::NotOpen));
        assert_eq!(converted, ModbusError::ServerDeviceFailure);
        assert!(logs.is_empty());
    }

    #[test]
    fn registers_are_not_supported() {
        let (mapper, _) = setup();
        let req = RegistersRequest {
            unit_id: UNIT,
            addr: 100,
            quantity: 1,
            is_write: false,
            args: vec![],
            client_addr: client(),
        };
        assert_eq!(
            mapper.handle_holding_registers(&req),
            Err(ModbusError::IllegalFunction)
        );
        assert_eq!(
            mapper.handle_input_registers(&req),
            Err(ModbusError::IllegalFunction)
        );
    }

    #[test]
    fn permission_changes_apply_to_later_requests() {
        let (mapper, _) = setup();
        let read = CoilsRequest::read(UNIT, 17, 1, client());
        assert!(mapper.handle_coils(&read).is_ok());
        mapper.registry().write().unwrap().deny(17).unwrap();
        assert_eq!(
            mapper.handle_coils(&read),
            Err(ModbusError::IllegalDataAddress(17))
        );
    }

    #[test]
    fn concurrent_requests_are_serialized() {
        let (mapper, board) = setup();
        let workers: Vec<_> = (0..8)
            .map(|i| {
                let mapper = mapper.clone();
                std::thread::spawn(move || {
                    for n in 0..200 {
                        let value = (i + n) % 2 == 0;
                        let write = CoilsRequest::write(UNIT, 17, vec![value], client());
                        mapper.handle_coils(&write).unwrap();
                        let read = CoilsRequest::read(UNIT, 17, 1, client());
                        assert_eq!(mapper.handle_coils(&read).unwrap().len(), 1);
                        assert!(mapper
                            .handle_discrete_inputs(&read_input(UNIT, 6, 1))
                            .is_ok());
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        let last = CoilsRequest::write(UNIT, 17, vec![true], client());
        mapper.handle_coils(&last).unwrap();
        assert_eq!(board.level(17), Some(Level::High));
    }
}
