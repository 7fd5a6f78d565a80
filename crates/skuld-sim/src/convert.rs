//! Conversion between circuits and the Clifford operations they implement.

use rand::SeedableRng;
use rand::rngs::StdRng;

use skuld_circuit::{Circuit, GateId};
use skuld_stab::Tableau;

use crate::error::{SimError, SimResult};
use crate::simulator::TableauSimulator;

/// The Clifford operation a unitary circuit implements.
///
/// Annotations (`TICK`, `QUBIT_COORDS`, `SHIFT_COORDS`) are ignored; any
/// measurement, reset, noise, or classical-feedback operation is rejected
/// because the circuit then has no single tableau.
pub fn circuit_to_tableau(circuit: &Circuit) -> SimResult<Tableau> {
    let mut sim = TableauSimulator::new(
        StdRng::seed_from_u64(0),
        circuit.count_qubits() as usize,
    );
    run_unitaries(&mut sim, circuit)?;
    Ok(sim
        .inv_state
        .inverse()
        .expect("simulator states satisfy the tableau invariants"))
}

fn run_unitaries(sim: &mut TableauSimulator<StdRng>, circuit: &Circuit) -> SimResult<()> {
    for inst in circuit.instructions() {
        if inst.gate == GateId::Repeat {
            let reps = circuit.repeat_count_of(inst);
            let body = circuit.repeat_body_of(inst);
            for _ in 0..reps {
                run_unitaries(sim, body)?;
            }
            continue;
        }
        let data = inst.gate.data();
        match inst.gate {
            GateId::Tick | GateId::QubitCoords | GateId::ShiftCoords => continue,
            _ if data.is_unitary() => {
                if circuit.targets_of(inst).iter().any(|t| t.is_classical_bit()) {
                    return Err(SimError::NotUnitary {
                        gate: data.name,
                    });
                }
                sim.apply_instruction(circuit, inst)?;
            }
            _ => return Err(SimError::NotUnitary { gate: data.name }),
        }
    }
    Ok(())
}
