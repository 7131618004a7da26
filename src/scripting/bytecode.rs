//! Bytecode compile/load cycle.
//!
//! Artifacts are engine-version specific: load them only with the same
//! build that produced them. The serialized form adds a small header that
//! records the artifact kind and catches truncated or mislabelled buffers.
//! The header does not validate the bytecode itself, and the engine trusts
//! whatever it is given, so rebuilding an artifact from bytes is `unsafe`.

use rquickjs::qjs;
use tracing::debug;

use crate::core::{BridgeError, BridgeResult};
use crate::scripting::eval::EvalFlags;
use crate::scripting::handle::Handle;
use crate::scripting::runtime::Scope;

const MAGIC: &[u8; 4] = b"JSB\0";
const HEADER_LEN: usize = MAGIC.len() + 1;

const WRITE_OBJ_BYTECODE: i32 = 1 << 0;
const READ_OBJ_BYTECODE: i32 = 1 << 0;

/// What kind of code an artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Script = 0,
    Module = 1,
}

impl ArtifactKind {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Script),
            1 => Some(Self::Module),
            _ => None,
        }
    }
}

/// Compiled code, ready to be stored and later run without the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledArtifact {
    kind: ArtifactKind,
    bytecode: Vec<u8>,
}

impl CompiledArtifact {
    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    /// The engine's serialized object, without the header.
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    pub fn len(&self) -> usize {
        self.bytecode.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytecode.is_empty()
    }

    /// Serializes the artifact for storage.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.bytecode.len());
        out.extend_from_slice(MAGIC);
        out.push(self.kind as u8);
        out.extend_from_slice(&self.bytecode);
        out
    }

    /// Reads back a buffer written by [`CompiledArtifact::to_bytes`].
    ///
    /// Only the header is checked. A bad header is an
    /// [`BridgeError::InvalidArtifact`] error.
    ///
    /// # Safety
    ///
    /// `bytes` must be the unmodified output of `to_bytes` on an artifact
    /// compiled by the same engine build. Running the artifact with
    /// [`Scope::load_and_run`] hands the payload to the engine unchecked, and
    /// corrupted or foreign bytecode is undefined behaviour.
    pub unsafe fn from_bytes(bytes: &[u8]) -> BridgeResult<Self> {
        if bytes.len() <= HEADER_LEN {
            return Err(BridgeError::InvalidArtifact(format!(
                "buffer of {} bytes is too short",
                bytes.len()
            )));
        }
        let (header, bytecode) = bytes.split_at(HEADER_LEN);
        if &header[..MAGIC.len()] != MAGIC {
            return Err(BridgeError::InvalidArtifact("bad magic".to_string()));
        }
        let kind = ArtifactKind::from_byte(header[MAGIC.len()]).ok_or_else(|| {
            BridgeError::InvalidArtifact(format!("unknown kind {}", header[MAGIC.len()]))
        })?;
        Ok(Self {
            kind,
            bytecode: bytecode.to_vec(),
        })
    }
}

impl<'js> Scope<'js> {
    /// Compiles global script code without running it.
    pub fn compile(&self, source: &str, filename: &str) -> BridgeResult<CompiledArtifact> {
        self.compile_as(source, filename, ArtifactKind::Script)
    }

    /// Compiles a module without running it.
    ///
    /// Imports are resolved at compile time, so the module loader must be
    /// able to supply them. Loading the artifact resolves them again in the
    /// loading runtime.
    pub fn compile_module(&self, source: &str, name: &str) -> BridgeResult<CompiledArtifact> {
        self.compile_as(source, name, ArtifactKind::Module)
    }

    fn compile_as(
        &self,
        source: &str,
        filename: &str,
        kind: ArtifactKind,
    ) -> BridgeResult<CompiledArtifact> {
        let flags = match kind {
            ArtifactKind::Script => EvalFlags::GLOBAL,
            ArtifactKind::Module => EvalFlags::MODULE,
        } | EvalFlags::COMPILE_ONLY;
        let compiled = self.evaluate(source, filename, flags)?;

        let ctx = self.ctx().as_raw().as_ptr();
        let mut len = 0;
        // SAFETY: `compiled` keeps the object alive for the write. The buffer
        // belongs to the engine allocator and is copied before it is freed.
        let bytecode = unsafe {
            let buf = qjs::JS_WriteObject(ctx, &mut len, compiled.as_raw(), WRITE_OBJ_BYTECODE as _);
            if buf.is_null() {
                return Err(self.pending_exception());
            }
            let bytes = std::slice::from_raw_parts(buf, len as usize).to_vec();
            qjs::js_free(ctx, buf.cast());
            bytes
        };

        debug!(target: "jsbridge::bytecode", filename, ?kind, len = bytecode.len(), "Compiled");
        Ok(CompiledArtifact { kind, bytecode })
    }

    /// Materializes an artifact and runs it.
    ///
    /// Module artifacts have their imports resolved and their body executed;
    /// script artifacts return the completion value of their last statement.
    pub fn load_and_run(&self, artifact: &CompiledArtifact) -> BridgeResult<Handle<'js>> {
        if artifact.is_empty() {
            return Err(BridgeError::InvalidArtifact("empty bytecode".to_string()));
        }
        let ctx = self.ctx().as_raw().as_ptr();
        let bytes = artifact.bytecode();

        // SAFETY: the reader only borrows `bytes`. Every raw result is either
        // checked for the exception sentinel by `wrap_raw` or handed to
        // `JS_EvalFunction`, which consumes it.
        let function = unsafe {
            let raw = qjs::JS_ReadObject(ctx, bytes.as_ptr(), bytes.len() as _, READ_OBJ_BYTECODE as _);
            self.wrap_raw(raw)?
        };

        if artifact.kind() == ArtifactKind::Module {
            // SAFETY: `function` holds the module value for the call.
            let status = unsafe { qjs::JS_ResolveModule(ctx, function.as_raw()) };
            if status < 0 {
                return Err(self.pending_exception());
            }
        }

        debug!(target: "jsbridge::bytecode", kind = ?artifact.kind(), len = bytes.len(), "Loading");
        // SAFETY: see above; `into_raw` gives the call its own reference.
        unsafe {
            let raw = qjs::JS_EvalFunction(ctx, function.into_raw());
            self.wrap_raw(raw)
        }
    }
}
