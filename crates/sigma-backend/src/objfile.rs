//! COFF/ELF object container writer.
//!
//! Wraps every emitted [`CompiledFunction`] into one relocatable object:
//! a `.text` section holding all function bodies back to back, a
//! `.rdata`/`.rodata` section holding the string and float constant pools,
//! and a relocation for every call target and constant-pool load each
//! function's emitter recorded. Built on the `object` crate's write API —
//! the same crate `rustc_codegen_ssa` uses for this exact concern — rather
//! than a hand-rolled binary writer.

use crate::emit::{CompiledFunction, RelocKind, RelocTarget};
use object::write::{Object, Relocation, StandardSection, Symbol, SymbolSection};
use object::{
    Architecture, BinaryFormat, Endianness, RelocationEncoding, RelocationFlags, RelocationKind,
    SymbolFlags, SymbolKind, SymbolScope,
};
use sigma_error::{Error, Result};
use std::collections::HashMap;

/// Which platform container to wrap the emitted code in. The target
/// triple, not the host the compiler runs on, decides this — CI running on
/// Linux still needs to be able to compile COFF fixtures and vice versa.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ObjectFormat {
    Coff,
    Elf,
}

impl ObjectFormat {
    fn binary_format(self) -> BinaryFormat {
        match self {
            ObjectFormat::Coff => BinaryFormat::Coff,
            ObjectFormat::Elf => BinaryFormat::Elf,
        }
    }
}

/// Concatenate every function's code into `.text` and every function's
/// string/float constant pool into `.rdata`, emitting one relocation per
/// call site and per constant-pool load, then serialize the result.
pub fn write_object(functions: &[CompiledFunction], format: ObjectFormat) -> Result<Vec<u8>> {
    let mut obj = Object::new(format.binary_format(), Architecture::X86_64, Endianness::Little);

    let text = obj.section_id(StandardSection::Text);
    let rdata = obj.section_id(StandardSection::ReadOnlyData);

    // Pass 1: lay out every function's code in `.text` and define its
    // symbol, and every function's constant pools in `.rdata`. Relocation
    // targets inside a function's own constant pools need these offsets
    // before pass 2 can emit relocations against them.
    let mut func_offset = HashMap::new();
    let mut func_symbol = HashMap::new();
    let mut string_offsets: Vec<Vec<u64>> = Vec::with_capacity(functions.len());
    let mut float_offsets: Vec<Vec<u64>> = Vec::with_capacity(functions.len());

    for f in functions {
        let offset = obj.append_section_data(text, &f.code, 16);
        func_offset.insert(f.name.clone(), offset);
        let symbol = obj.add_symbol(Symbol {
            name: f.name.as_bytes().to_vec(),
            value: offset,
            size: f.code.len() as u64,
            kind: SymbolKind::Text,
            scope: SymbolScope::Linkage,
            weak: false,
            section: SymbolSection::Section(text),
            flags: SymbolFlags::None,
        });
        func_symbol.insert(f.name.clone(), symbol);

        let mut strings = Vec::with_capacity(f.string_pool.len());
        for s in &f.string_pool {
            let mut bytes = s.as_bytes().to_vec();
            bytes.push(0); // NUL-terminated, for cheap interop with C runtime calls.
            strings.push(obj.append_section_data(rdata, &bytes, 1));
        }
        string_offsets.push(strings);

        let mut floats = Vec::with_capacity(f.float_pool.len());
        for &(is_f64, bits) in &f.float_pool {
            let bytes = if is_f64 { bits.to_le_bytes().to_vec() } else { (bits as u32).to_le_bytes().to_vec() };
            floats.push(obj.append_section_data(rdata, &bytes, if is_f64 { 8 } else { 4 }));
        }
        float_offsets.push(floats);
    }

    // Pass 2: every call/constant-pool relocation each function's emitter
    // recorded becomes a platform-specific REL32 relocation. Calls to a
    // symbol not defined in this translation unit get an undefined symbol
    // added on demand — the linker resolves those across object files.
    for (i, f) in functions.iter().enumerate() {
        let base = func_offset[&f.name];
        for reloc in &f.relocations {
            let (symbol, addend) = match &reloc.target {
                RelocTarget::Call(name) => {
                    let symbol = *func_symbol.entry(name.clone()).or_insert_with(|| {
                        obj.add_symbol(Symbol {
                            name: name.as_bytes().to_vec(),
                            value: 0,
                            size: 0,
                            kind: SymbolKind::Text,
                            scope: SymbolScope::Linkage,
                            weak: false,
                            section: SymbolSection::Undefined,
                            flags: SymbolFlags::None,
                        })
                    });
                    (symbol, -4)
                }
                RelocTarget::StringConst(idx) => {
                    let target_offset = string_offsets[i][*idx as usize];
                    (rdata_symbol_at(&mut obj, rdata, target_offset), -4)
                }
                RelocTarget::FloatConst(idx) => {
                    let target_offset = float_offsets[i][*idx as usize];
                    (rdata_symbol_at(&mut obj, rdata, target_offset), -4)
                }
            };
            let kind = match reloc.kind {
                // `Relative` covers every REL32 use here (calls and
                // `.rdata` constant loads); `PltRelative` is ELF-specific
                // and COFF has no equivalent, so this is the one kind that
                // serializes under both formats.
                RelocKind::Pc32 => RelocationKind::Relative,
            };
            obj.add_relocation(
                text,
                Relocation {
                    offset: base + reloc.offset as u64,
                    symbol,
                    addend,
                    flags: RelocationFlags::Generic { kind, encoding: RelocationEncoding::Generic, size: 32 },
                },
            )
            .map_err(|e| Error::object_emit_failed(e.to_string()))?;
        }
    }

    obj.write().map_err(|e| Error::object_emit_failed(e.to_string()))
}

/// `.rdata` offsets don't carry their own symbol from `append_section_data`,
/// so constant-pool relocations need one defined on demand, local to this
/// object (`SymbolScope::Compilation` — never referenced across translation
/// units).
fn rdata_symbol_at(obj: &mut Object, rdata: object::write::SectionId, offset: u64) -> object::write::SymbolId {
    obj.add_symbol(Symbol {
        name: format!(".rdata+{offset:#x}").into_bytes(),
        value: offset,
        size: 0,
        kind: SymbolKind::Data,
        scope: SymbolScope::Compilation,
        weak: false,
        section: SymbolSection::Section(rdata),
        flags: SymbolFlags::None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::Relocation as EmitRelocation;
    use object::ObjectSymbol;

    fn trivial_function(name: &str) -> CompiledFunction {
        CompiledFunction {
            name: name.into(),
            code: vec![0xC3], // ret
            relocations: Vec::new(),
            frame_size: 0,
            string_pool: Vec::new(),
            float_pool: Vec::new(),
        }
    }

    #[test]
    fn coff_object_round_trips_through_the_reader() {
        let bytes = write_object(&[trivial_function("main")], ObjectFormat::Coff).unwrap();
        let file = object::read::File::parse(&*bytes).unwrap();
        assert_eq!(file.format(), BinaryFormat::Coff);
        assert!(object::Object::symbols(&file).any(|s| s.name() == Ok("main")));
    }

    #[test]
    fn elf_object_round_trips_through_the_reader() {
        let bytes = write_object(&[trivial_function("main")], ObjectFormat::Elf).unwrap();
        let file = object::read::File::parse(&*bytes).unwrap();
        assert_eq!(file.format(), BinaryFormat::Elf);
    }

    #[test]
    fn call_relocation_references_the_callee_symbol() {
        let mut caller = trivial_function("caller");
        caller.code = vec![0xE8, 0x00, 0x00, 0x00, 0x00, 0xC3];
        caller.relocations.push(EmitRelocation {
            offset: 1,
            kind: RelocKind::Pc32,
            target: RelocTarget::Call("callee".into()),
        });
        let bytes = write_object(&[caller, trivial_function("callee")], ObjectFormat::Elf).unwrap();
        let file = object::read::File::parse(&*bytes).unwrap();
        assert!(object::Object::symbols(&file).any(|s| s.name() == Ok("callee")));
    }
}
