//! Startup sequencing from process entry to the program's entry point.
//!
//! The driver walks a strictly sequential state machine; there is no
//! branching, no retry and no recoverable failed state. Any error
//! terminates the process, because a half-linked program cannot safely run.

use crate::{
    Result,
    auxv::{AT_BASE, AT_EXECFD, AuxVector},
    bootstrap_error,
    input::{LibraryFile, LibraryProvider, SystemLibraries},
    loader::Loader,
    os::{DefaultMmap, DefaultRuntime, Mmap, Runtime},
    selfreloc::{FALLBACK_LOAD_BASE, relocate_self},
};
use alloc::boxed::Box;
use core::ffi::c_int;

/// Reserved registry name for the main program; the kernel hands over its
/// file descriptor but no name.
pub const MAIN_PROGRAM: &str = "main";

/// Signature of the program entry point under the kernel's start
/// convention.
pub type EntryFn = unsafe extern "C" fn(c_int, *const *const u8, *const *const u8) -> c_int;

/// The stages of bringing a process image to life, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Patching the loader's own relative relocations.
    RelocatingSelf,
    /// Bringing up the minimal runtime (heap and friends).
    InitializingRuntime,
    /// Registering the main program from its inherited file descriptor.
    MappingMainProgram,
    /// Walking the needed-library graph.
    ResolvingDependencies,
    /// Reserving the process-wide TLS block.
    AllocatingTls,
    /// Mapping and relocating every module, dependencies first.
    Linking,
    /// Reading the main program's entry point.
    ResolvingEntry,
    /// Control has permanently left the loader.
    Transferred,
}

impl Phase {
    /// The following stage. Transitions are strictly sequential.
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::RelocatingSelf => Some(Phase::InitializingRuntime),
            Phase::InitializingRuntime => Some(Phase::MappingMainProgram),
            Phase::MappingMainProgram => Some(Phase::ResolvingDependencies),
            Phase::ResolvingDependencies => Some(Phase::AllocatingTls),
            Phase::AllocatingTls => Some(Phase::Linking),
            Phase::Linking => Some(Phase::ResolvingEntry),
            Phase::ResolvingEntry => Some(Phase::Transferred),
            Phase::Transferred => None,
        }
    }
}

/// Drives the bootstrap phases in order and hands control to the resolved
/// entry point.
pub struct Bootstrap<M = DefaultMmap, R = DefaultRuntime, P = SystemLibraries>
where
    M: Mmap,
    R: Runtime,
    P: LibraryProvider,
{
    loader: Loader<M, R, P>,
    phase: Phase,
}

impl<M, R, P> Bootstrap<M, R, P>
where
    M: Mmap,
    R: Runtime,
    P: LibraryProvider,
{
    /// Creates a driver resolving libraries through `provider`.
    pub fn new(provider: P) -> Self {
        Self {
            loader: Loader::new(provider),
            phase: Phase::RelocatingSelf,
        }
    }

    /// The stage the driver is currently in.
    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The underlying loader state.
    #[inline]
    pub fn loader(&self) -> &Loader<M, R, P> {
        &self.loader
    }

    fn advance(&mut self, next: Phase) {
        debug_assert_eq!(self.phase.next(), Some(next));
        self.phase = next;
        #[cfg(feature = "log")]
        log::trace!("Entering phase {:?}", next);
    }

    /// Runs every phase up to entry-point resolution and returns the
    /// absolute entry address.
    ///
    /// # Safety
    /// `auxv` must be the auxiliary vector of the current process, and the
    /// loader image must be mapped at the address the vector (or the
    /// fallback constant) reports.
    pub unsafe fn run(&mut self, auxv: &AuxVector) -> Result<usize> {
        debug_assert_eq!(self.phase, Phase::RelocatingSelf);
        let base = auxv.get(AT_BASE).unwrap_or(FALLBACK_LOAD_BASE);
        unsafe { relocate_self(base) }?;

        self.advance(Phase::InitializingRuntime);
        unsafe { R::init_runtime() };

        self.advance(Phase::MappingMainProgram);
        let fd = auxv
            .get(AT_EXECFD)
            .ok_or_else(|| bootstrap_error("auxiliary vector carries no program descriptor"))?;
        let source = unsafe { LibraryFile::from_owned_fd(MAIN_PROGRAM, fd as i32) };
        self.loader.map_library(MAIN_PROGRAM, Box::new(source))?;

        self.advance(Phase::ResolvingDependencies);
        self.loader.resolve_dependencies(MAIN_PROGRAM)?;

        self.advance(Phase::AllocatingTls);
        self.loader.allocate_tls()?;

        self.advance(Phase::Linking);
        self.loader.link_modules(MAIN_PROGRAM)?;

        self.advance(Phase::ResolvingEntry);
        let entry = self.loader.entry_point(MAIN_PROGRAM)?;

        // The inspection mappings only existed to drive loading.
        self.loader.registry_mut().clear_descriptors();

        #[cfg(feature = "log")]
        log::debug!("Entry point: 0x{:x}", entry);
        Ok(entry)
    }

    /// Jumps to the program with the original arguments unmodified, as if
    /// it had been the direct target of process start, then terminates the
    /// process with the program's return value.
    ///
    /// # Safety
    /// `entry` must be the address returned by [`run`](Self::run) and the
    /// argument pointers must be the ones received at process entry.
    pub unsafe fn transfer(
        mut self,
        entry: usize,
        argc: c_int,
        argv: *const *const u8,
        envp: *const *const u8,
    ) -> ! {
        self.advance(Phase::Transferred);
        #[cfg(feature = "log")]
        log::debug!("Jumping to program entry point: 0x{:x}", entry);
        let main: EntryFn = unsafe { core::mem::transmute(entry) };
        let status = unsafe { main(argc, argv, envp) };
        R::exit(status)
    }
}

/// Process entry glue: the platform startup shim calls this with the
/// kernel-provided arguments. Does not return.
///
/// # Safety
/// Must be called exactly once, at process entry, with the unmodified
/// `argc`/`argv`/`envp` the kernel delivered.
pub unsafe fn loader_entry(argc: c_int, argv: *const *const u8, envp: *const *const u8) -> ! {
    let auxv = unsafe { AuxVector::from_envp(envp) };
    let mut boot: Bootstrap = Bootstrap::new(SystemLibraries::default());
    match unsafe { boot.run(&auxv) } {
        Ok(entry) => unsafe { boot.transfer(entry, argc, argv, envp) },
        Err(err) => {
            // Diagnostics are best-effort; the debug channel may not exist.
            #[cfg(feature = "log")]
            log::error!("Load failed during {:?}: {}", boot.phase(), err);
            #[cfg(not(feature = "log"))]
            let _ = err;
            DefaultRuntime::exit(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Phase;

    #[test]
    fn phases_are_strictly_sequential() {
        let mut phase = Phase::RelocatingSelf;
        let expected = [
            Phase::InitializingRuntime,
            Phase::MappingMainProgram,
            Phase::ResolvingDependencies,
            Phase::AllocatingTls,
            Phase::Linking,
            Phase::ResolvingEntry,
            Phase::Transferred,
        ];
        for next in expected {
            phase = phase.next().unwrap();
            assert_eq!(phase, next);
        }
        assert_eq!(phase.next(), None);
    }
}
