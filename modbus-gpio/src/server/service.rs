use std::future;
use std::net::SocketAddr;

use tokio_modbus::{ExceptionCode, Request, Response, SlaveRequest};

use crate::backend::GpioBackend;
use crate::error::ModbusError;
use crate::mapper::{CoilsRequest, DiscreteInputsRequest, RegistersRequest, RequestMapper};
use crate::server::session::Session;

/// Per-connection service handed to the tokio-modbus engine
pub(crate) struct GpioService<B: GpioBackend> {
    mapper: RequestMapper<B>,
    client_addr: SocketAddr,
    _session: Session,
}

impl<B: GpioBackend> GpioService<B> {
    pub(crate) fn new(mapper: RequestMapper<B>, client_addr: SocketAddr, session: Session) -> Self {
        Self {
            mapper,
            client_addr,
            _session: session,
        }
    }

    fn registers(
        &self,
        unit_id: u8,
        addr: u16,
        quantity: u16,
        args: Vec<u16>,
    ) -> RegistersRequest {
        RegistersRequest {
            unit_id,
            addr,
            quantity,
            is_write: !args.is_empty(),
            args,
            client_addr: self.client_addr,
        }
    }

    pub(crate) fn process(&self, req: SlaveRequest<'static>) -> Result<Response, ModbusError> {
        let SlaveRequest { slave, request } = req;
        match request {
            Request::ReadCoils(addr, quantity) => self
                .mapper
                .handle_coils(&CoilsRequest::read(slave, addr, quantity, self.client_addr))
                .map(Response::ReadCoils),
            Request::WriteSingleCoil(addr, value) => self
                .mapper
                .handle_coils(&CoilsRequest::write(
                    slave,
                    addr,
                    vec![value],
                    self.client_addr,
                ))
                .map(|_| Response::WriteSingleCoil(addr, value)),
            Request::WriteMultipleCoils(addr, values) => {
                let req = CoilsRequest::write(slave, addr, values.into_owned(), self.client_addr);
                let quantity = req.quantity;
                self.mapper
                    .handle_coils(&req)
                    .map(|_| Response::WriteMultipleCoils(addr, quantity))
            }
            Request::ReadDiscreteInputs(addr, quantity) => self
                .mapper
                .handle_discrete_inputs(&DiscreteInputsRequest {
                    unit_id: slave,
                    addr,
                    quantity,
                    client_addr: self.client_addr,
                })
                .map(Response::ReadDiscreteInputs),
            Request::ReadHoldingRegisters(addr, quantity) => self
                .mapper
                .handle_holding_registers(&self.registers(slave, addr, quantity, Vec::new()))
                .map(Response::ReadHoldingRegisters),
            Request::ReadInputRegisters(addr, quantity) => self
                .mapper
                .handle_input_registers(&self.registers(slave, addr, quantity, Vec::new()))
                .map(Response::ReadInputRegisters),
            Request::WriteSingleRegister(addr, value) => self
                .mapper
                .handle_holding_registers(&self.registers(slave, addr, 1, vec![value]))
                .map(|_| Response::WriteSingleRegister(addr, value)),
            Request::WriteMultipleRegisters(addr, values) => {
                let values = values.into_owned();
                let quantity = u16::try_from(values.len()).unwrap_or(u16::MAX);
                self.mapper
                    .handle_holding_registers(&self.registers(slave, addr, quantity, values))
                    .map(|_| Response::WriteMultipleRegisters(addr, quantity))
            }
            other => {
                tracing::warn!(
                    "unsupported request from {}: {:?}",
                    self.client_addr,
                    other
                );
                Err(ModbusError::IllegalFunction)
            }
        }
    }
}

impl<B: GpioBackend> tokio_modbus::server::Service for GpioService<B> {
    type Request = SlaveRequest<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let result = self.process(req).map_err(|err| {
            tracing::warn!("request from {} failed: {}", self.client_addr, err);
            ExceptionCode::from(err)
        });
        future::ready(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::simulated::SimulatedBackend;
    use crate::backend::Level;
    use crate::mapper::share;
    use crate::pin::PullMode;
    use crate::registry::PinRegistry;
    use crate::server::session::SessionTracker;

    fn service() -> (GpioService<SimulatedBackend>, SimulatedBackend) {
        let board = SimulatedBackend::new();
        let mut registry = PinRegistry::new(board.clone());
        registry.open().unwrap();
        registry.set_pin_as_coil(17).unwrap();
        registry.allow(17).unwrap();
        registry
            .set_pin_as_discrete_input(6, PullMode::PullDown)
            .unwrap();
        registry.allow(6).unwrap();

        let client = SocketAddr::from(([127, 0, 0, 1], 40000));
        let tracker = SessionTracker::wrapped(1);
        let session = SessionTracker::add(&tracker, client).unwrap();
        let mapper = RequestMapper::new(share(registry), 255);
        (GpioService::new(mapper, client, session), board)
    }

    fn call(
        service: &GpioService<SimulatedBackend>,
        slave: u8,
        request: Request<'static>,
    ) -> Result<Response, ModbusError> {
        service.process(SlaveRequest { slave, request })
    }

    #[test]
    fn single_coil_write_echoes_the_request() {
        let (service, board) = service();
        assert_eq!(
            call(&service, 255, Request::WriteSingleCoil(17, true)),
            Ok(Response::WriteSingleCoil(17, true))
        );
        assert_eq!(board.level(17), Some(Level::High));
        assert_eq!(
            call(&service, 255, Request::ReadCoils(17, 1)),
            Ok(Response::ReadCoils(vec![true]))
        );
    }

    #[test]
    fn multiple_coil_write_of_one_value_is_accepted() {
        let (service, board) = service();
        assert_eq!(
            call(
                &service,
                255,
                Request::WriteMultipleCoils(17, vec![true].into())
            ),
            Ok(Response::WriteMultipleCoils(17, 1))
        );
        assert_eq!(board.level(17), Some(Level::High));
        assert_eq!(
            call(
                &service,
                255,
                Request::WriteMultipleCoils(17, vec![false, true].into())
            ),
            Err(ModbusError::IllegalDataValue)
        );
    }

    #[test]
    fn discrete_input_is_translated() {
        let (service, board) = service();
        board.drive(6, Level::High);
        assert_eq!(
            call(&service, 255, Request::ReadDiscreteInputs(6, 1)),
            Ok(Response::ReadDiscreteInputs(vec![true]))
        );
    }

    #[test]
    fn slave_id_is_checked() {
        let (service, _) = service();
        assert_eq!(
            call(&service, 1, Request::ReadCoils(17, 1)),
            Err(ModbusError::BadUnitId(1))
        );
    }

    #[test]
    fn registers_are_illegal_functions() {
        let (service, _) = service();
        for request in [
            Request::ReadHoldingRegisters(100, 1),
            Request::ReadInputRegisters(200, 2),
            Request::WriteSingleRegister(100, 7),
            Request::WriteMultipleRegisters(100, vec![1, 2].into()),
        ] {
            assert_eq!(
                call(&service, 255, request),
                Err(ModbusError::IllegalFunction)
            );
        }
    }

    #[test]
    fn exceptions_map_to_modbus_codes() {
        assert_eq!(
            ExceptionCode::from(ModbusError::BadUnitId(3)),
            ExceptionCode::GatewayTargetDevice
        );
        assert_eq!(
            ExceptionCode::from(ModbusError::IllegalDataAddress(17)),
            ExceptionCode::IllegalDataAddress
        );
        assert_eq!(
            ExceptionCode::from(ModbusError::IllegalDataValue),
            ExceptionCode::IllegalDataValue
        );
        assert_eq!(
            ExceptionCode::from(ModbusError::ServerDeviceFailure),
            ExceptionCode::ServerDeviceFailure
        );
    }
}
