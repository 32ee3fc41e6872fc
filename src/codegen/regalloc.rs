use crate::{
    codegen::asm::AsmRegister,
    error::{CompileError, CompileResult},
};
use std::{collections::HashMap, fmt};

/// Allocatable registers, in allocation and save/restore order. All of them
/// are caller-saved; `rax` stays outside as accumulator and return register.
pub const GP_REGISTERS: [AsmRegister; 8] = [
    AsmRegister::Di,
    AsmRegister::Si,
    AsmRegister::Dx,
    AsmRegister::Cx,
    AsmRegister::R8,
    AsmRegister::R9,
    AsmRegister::R10,
    AsmRegister::R11,
];

/// Integer-class argument registers, in parameter order.
pub const PARAMETER_REGISTERS: [AsmRegister; 6] = [
    AsmRegister::Di,
    AsmRegister::Si,
    AsmRegister::Dx,
    AsmRegister::Cx,
    AsmRegister::R8,
    AsmRegister::R9,
];

/// Handle for "wherever this value currently lives".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location(pub usize);

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub location: Location,
    /// Bound to an incoming procedure parameter.
    pub parameter: bool,
}

/// Fixed register slots plus the Location -> slot index kept in step with
/// them.
#[derive(Debug, Clone, Default)]
pub struct RegisterFile {
    slots: [Option<Slot>; GP_REGISTERS.len()],
    index: HashMap<Location, usize>,
    homes: HashMap<Location, AsmRegister>,
}

fn slot_of(register: AsmRegister) -> CompileResult<usize> {
    GP_REGISTERS
        .iter()
        .position(|r| *r == register)
        .ok_or_else(|| CompileError::resource(format!("{} is not allocatable", register)))
}

impl RegisterFile {
    pub fn new() -> RegisterFile {
        RegisterFile::default()
    }

    /// Register holding `location`, claiming the first empty slot if it has
    /// none yet. The flag tells whether a slot was newly claimed.
    pub fn allocate(&mut self, location: Location) -> CompileResult<(AsmRegister, bool)> {
        if let Some(register) = self.register_of(location) {
            return Ok((register, false));
        }

        let free = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or_else(|| CompileError::resource("no available register"))?;

        self.slots[free] = Some(Slot {
            location,
            parameter: false,
        });
        self.index.insert(location, free);
        Ok((GP_REGISTERS[free], true))
    }

    /// Put `location` into a specific empty register.
    pub fn claim(
        &mut self,
        register: AsmRegister,
        location: Location,
        parameter: bool,
    ) -> CompileResult<()> {
        let slot = slot_of(register)?;
        if let Some(occupant) = self.slots[slot] {
            return Err(CompileError::resource(format!(
                "{} already holds {}",
                register, occupant.location
            )));
        }
        if let Some(previous) = self.register_of(location) {
            return Err(CompileError::resource(format!(
                "{} already lives in {}",
                location, previous
            )));
        }

        self.slots[slot] = Some(Slot {
            location,
            parameter,
        });
        self.index.insert(location, slot);
        if parameter {
            self.homes.insert(location, register);
        }
        Ok(())
    }

    /// Empty a register, returning what it held.
    pub fn vacate(&mut self, register: AsmRegister) -> Option<Slot> {
        let slot = slot_of(register).ok()?;
        let occupant = self.slots[slot].take()?;
        self.index.remove(&occupant.location);
        Some(occupant)
    }

    /// Forget `location` entirely, freeing its register if it has one.
    pub fn release(&mut self, location: Location) -> Option<AsmRegister> {
        self.homes.remove(&location);
        let slot = self.index.remove(&location)?;
        self.slots[slot] = None;
        Some(GP_REGISTERS[slot])
    }

    /// Re-tag the value in `register` without moving it.
    pub fn swap(
        &mut self,
        register: AsmRegister,
        old: Location,
        new: Location,
    ) -> CompileResult<()> {
        let slot = slot_of(register)?;
        match self.slots[slot] {
            Some(occupant) if occupant.location == old => {
                if old != new && self.index.contains_key(&new) {
                    return Err(CompileError::resource(format!(
                        "{} is already resident",
                        new
                    )));
                }
                self.index.remove(&old);
                self.index.insert(new, slot);
                self.slots[slot] = Some(Slot {
                    location: new,
                    parameter: occupant.parameter,
                });
                if let Some(home) = self.homes.remove(&old) {
                    self.homes.insert(new, home);
                }
                Ok(())
            }
            _ => Err(CompileError::resource(format!(
                "{} does not hold {}",
                register, old
            ))),
        }
    }

    /// Move the occupant of `from` into the empty register `to`. The caller
    /// emits the matching `mov`.
    pub fn relocate(&mut self, from: AsmRegister, to: AsmRegister) -> CompileResult<Location> {
        let target = slot_of(to)?;
        if self.slots[target].is_some() {
            return Err(CompileError::resource(format!("{} is not free", to)));
        }
        let occupant = self
            .vacate(from)
            .ok_or_else(|| CompileError::resource(format!("{} is empty", from)))?;

        self.slots[target] = Some(occupant);
        self.index.insert(occupant.location, target);
        Ok(occupant.location)
    }

    pub fn register_of(&self, location: Location) -> Option<AsmRegister> {
        self.index.get(&location).map(|slot| GP_REGISTERS[*slot])
    }

    pub fn location_in(&self, register: AsmRegister) -> Option<Location> {
        let slot = slot_of(register).ok()?;
        self.slots[slot].map(|occupant| occupant.location)
    }

    pub fn is_parameter(&self, register: AsmRegister) -> bool {
        slot_of(register)
            .ok()
            .and_then(|slot| self.slots[slot])
            .is_some_and(|occupant| occupant.parameter)
    }

    /// Register a parameter Location was bound to on procedure entry.
    pub fn home_of(&self, location: Location) -> Option<AsmRegister> {
        self.homes.get(&location).copied()
    }

    /// First empty register not listed in `avoid`.
    pub fn first_free_except(&self, avoid: &[AsmRegister]) -> Option<AsmRegister> {
        GP_REGISTERS
            .iter()
            .zip(self.slots.iter())
            .find(|(register, slot)| slot.is_none() && !avoid.contains(register))
            .map(|(register, _)| *register)
    }

    pub fn is_free(&self, register: AsmRegister) -> bool {
        slot_of(register).is_ok_and(|slot| self.slots[slot].is_none())
    }

    /// Occupied registers in file order.
    pub fn occupied(&self) -> Vec<AsmRegister> {
        GP_REGISTERS
            .iter()
            .zip(self.slots.iter())
            .filter(|(_, slot)| slot.is_some())
            .map(|(register, _)| *register)
            .collect()
    }

    /// Parameter Locations that are not in their home register.
    pub fn displaced_parameters(&self) -> Vec<(Location, AsmRegister, AsmRegister)> {
        let mut displaced: Vec<_> = self
            .homes
            .iter()
            .filter_map(|(location, home)| {
                let current = self.register_of(*location)?;
                (current != *home).then_some((*location, current, *home))
            })
            .collect();
        displaced.sort_by_key(|(location, _, _)| *location);
        displaced
    }

    /// Every occupied slot must be indexed back to itself and every index
    /// entry must point at a slot holding its Location.
    pub fn check_consistency(&self) -> CompileResult<()> {
        for (slot, occupant) in self.slots.iter().enumerate() {
            if let Some(occupant) = occupant {
                if self.index.get(&occupant.location) != Some(&slot) {
                    return Err(CompileError::resource(format!(
                        "register file inconsistent: {} holds {} but the index disagrees",
                        GP_REGISTERS[slot], occupant.location
                    )));
                }
            }
        }

        for (location, slot) in &self.index {
            if self.slots[*slot].map(|occupant| occupant.location) != Some(*location) {
                return Err(CompileError::resource(format!(
                    "register file inconsistent: {} is indexed to {}",
                    location, GP_REGISTERS[*slot]
                )));
            }
        }

        Ok(())
    }
}
