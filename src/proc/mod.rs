//! Processes: address space, descriptor table, cwd, and threads, plus
//! `fork`, `exit`, and `waitpid`.
//!
//! There is no global current-process variable; syscall handlers receive
//! a `CurrentTask` naming the process and thread on whose behalf they
//! run.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use spin::{Mutex, Once};

use crate::console::DbgArea;
use crate::errno::{Errno, KResult};
use crate::fs::file::FileTable;
use crate::fs::vnode::Vnode;
use crate::kern::sched::{WaitQueue, WaitResult};
use crate::kern::thread::{KThread, ThreadState};
use crate::klog;
use crate::types::Pid;
use crate::vm::brk::BrkState;
use crate::vm::page::{USER_MEM_HIGH_PN, USER_MEM_LOW_PN, USER_MEM_LOW};
use crate::vm::pmap::Pmap;
use crate::vm::vmmap::VmMap;

// ============================================================================
// Process Structure
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Running,
    Exited(i64),
}

/// A process.
pub struct Proc {
    pid: Pid,
    name: String,
    parent: Mutex<Weak<Proc>>,
    children: Mutex<Vec<Arc<Proc>>>,
    state: Mutex<ProcState>,

    /// Address space
    pub vmmap: Mutex<VmMap>,
    /// Hardware translations for the address space
    pub pmap: Arc<Pmap>,
    /// Current working directory
    pub cwd: Mutex<Arc<Vnode>>,
    /// Open files
    pub files: Mutex<FileTable>,
    /// Heap break bookkeeping
    pub brk: Mutex<BrkState>,

    threads: Mutex<Vec<Arc<KThread>>>,
    /// Parents sleep here in waitpid; exiting children wake it.
    child_exit_queue: WaitQueue,
}

impl Proc {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ProcState {
        *self.state.lock()
    }

    /// The process's most recently created thread.
    pub fn main_thread(&self) -> Arc<KThread> {
        self.threads
            .lock()
            .last()
            .cloned()
            .expect("process has no threads")
    }
}

/// The process and thread a syscall runs on behalf of.
#[derive(Clone)]
pub struct CurrentTask {
    pub proc: Arc<Proc>,
    pub thread: Arc<KThread>,
}

impl CurrentTask {
    /// Enter a process as its main thread, as the scheduler would after a
    /// context switch.
    pub fn adopt(proc: Arc<Proc>) -> Self {
        let thread = proc.main_thread();
        Self { proc, thread }
    }
}

// ============================================================================
// Process Table
// ============================================================================

static PROC_TABLE: Once<Mutex<BTreeMap<Pid, Arc<Proc>>>> = Once::new();

fn proc_table() -> &'static Mutex<BTreeMap<Pid, Arc<Proc>>> {
    PROC_TABLE.call_once(|| Mutex::new(BTreeMap::new()))
}

/// Find a process by pid.
pub fn lookup(pid: Pid) -> Option<Arc<Proc>> {
    proc_table().lock().get(&pid).cloned()
}

/// Create a first process with a fresh address space, an empty
/// descriptor table, and `cwd` as its working directory.
pub fn spawn_init(name: &str, cwd: Arc<Vnode>) -> CurrentTask {
    let thread = KThread::new();
    thread.set_state(ThreadState::RUN);
    let proc = Arc::new(Proc {
        pid: Pid::alloc(),
        name: name.to_string(),
        parent: Mutex::new(Weak::new()),
        children: Mutex::new(Vec::new()),
        state: Mutex::new(ProcState::Running),
        vmmap: Mutex::new(VmMap::new()),
        pmap: Pmap::new(),
        cwd: Mutex::new(cwd),
        files: Mutex::new(FileTable::new()),
        brk: Mutex::new(BrkState::new(USER_MEM_LOW)),
        threads: Mutex::new(alloc::vec![Arc::clone(&thread)]),
        child_exit_queue: WaitQueue::new(),
    });
    proc_table().lock().insert(proc.pid, Arc::clone(&proc));
    CurrentTask { proc, thread }
}

// ============================================================================
// Fork / Exit / Waitpid
// ============================================================================

/// Create a child process whose address space is a copy-on-write clone
/// of the caller's.
///
/// The child shares the caller's open files and working directory, and
/// runs a clone of the calling thread. The parent's user translations
/// are dropped ahead of copy-on-write, so its next touch of a private
/// page faults into its own shadow. Returns the child's pid; the child
/// observes zero as its fork return value.
pub fn do_fork(task: &CurrentTask) -> KResult<Pid> {
    let parent = &task.proc;

    // Build the child fully before the parent is touched.
    let child_map = parent.vmmap.lock().clone_cow()?;
    let child_thread = task.thread.clone_thread();
    child_thread.set_state(ThreadState::RUN);

    let child = Arc::new(Proc {
        pid: Pid::alloc(),
        name: parent.name.clone(),
        parent: Mutex::new(Arc::downgrade(parent)),
        children: Mutex::new(Vec::new()),
        state: Mutex::new(ProcState::Running),
        vmmap: Mutex::new(child_map),
        pmap: Pmap::new(),
        cwd: Mutex::new(parent.cwd.lock().clone()),
        files: Mutex::new(parent.files.lock().clone_shared()),
        brk: Mutex::new(*parent.brk.lock()),
        threads: Mutex::new(alloc::vec![child_thread]),
        child_exit_queue: WaitQueue::new(),
    });

    parent.children.lock().push(Arc::clone(&child));
    proc_table().lock().insert(child.pid, Arc::clone(&child));

    // Ahead of copy-on-write: stale writable translations must fault.
    parent.pmap.unmap_range(USER_MEM_LOW_PN, USER_MEM_HIGH_PN);
    parent.pmap.tlb_flush_all();

    klog!(DbgArea::Proc, "forked {:?} from {:?}", child.pid, parent.pid);
    Ok(child.pid)
}

/// Terminate the calling process with `status`.
///
/// Tears down the address space and translations, closes every
/// descriptor, and wakes a parent blocked in waitpid. The parent's
/// shadow chains are collapsed now that this sharer is gone.
pub fn do_exit(task: &CurrentTask, status: i64) {
    let proc = &task.proc;
    *proc.state.lock() = ProcState::Exited(status);
    task.thread.exit(status);

    *proc.vmmap.lock() = VmMap::new();
    proc.pmap.unmap_range(USER_MEM_LOW_PN, USER_MEM_HIGH_PN);
    proc.pmap.tlb_flush_all();
    *proc.files.lock() = FileTable::new();

    if let Some(parent) = proc.parent.lock().upgrade() {
        parent.vmmap.lock().collapse_all();
        parent.child_exit_queue.wakeup_all();
    }
    klog!(DbgArea::Proc, "{:?} exited with {}", proc.pid, status);
}

/// Wait for a child to exit and reap it.
///
/// With `pid` the wait is for that specific child; otherwise any exited
/// child satisfies it. Returns the reaped child's pid and exit status.
/// `ECHILD` when there is no matching child; `EINTR` when the sleep is
/// cancelled.
pub fn do_waitpid(task: &CurrentTask, pid: Option<Pid>) -> KResult<(Pid, i64)> {
    let proc = &task.proc;
    let mut children = proc.children.lock();
    loop {
        if children.is_empty() {
            return Err(Errno::ECHILD);
        }
        if let Some(target) = pid {
            if !children.iter().any(|c| c.pid == target) {
                return Err(Errno::ECHILD);
            }
        }

        let found = children.iter().position(|c| {
            matches!(c.state(), ProcState::Exited(_)) && pid.map_or(true, |p| c.pid == p)
        });
        if let Some(idx) = found {
            let child = children.remove(idx);
            proc_table().lock().remove(&child.pid);
            let status = match child.state() {
                ProcState::Exited(s) => s,
                ProcState::Running => unreachable!(),
            };
            return Ok((child.pid, status));
        }

        let (guard, result) =
            proc.child_exit_queue
                .cancellable_sleep_on(&proc.children, children, &task.thread);
        children = guard;
        if result == WaitResult::Interrupted {
            return Err(Errno::EINTR);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::ramfs::RamFs;
    use crate::vm::page::{pn_to_addr, PAGE_SIZE};
    use crate::vm::vmmap::{Dir, MapFlags, Prot};

    fn init_task() -> (CurrentTask, Arc<RamFs>) {
        let fs = RamFs::new();
        (spawn_init("init", fs.root()), fs)
    }

    #[test]
    fn test_fork_is_copy_on_write() {
        let (parent, _fs) = init_task();
        let start = parent
            .proc
            .vmmap
            .lock()
            .map(
                &parent.proc.pmap,
                None,
                0,
                1,
                Prot::READ | Prot::WRITE,
                MapFlags::PRIVATE | MapFlags::ANON,
                0,
                Dir::HiLo,
            )
            .unwrap();
        let vaddr = pn_to_addr(start);
        parent.proc.vmmap.lock().write(vaddr, b"X").unwrap();

        let child_pid = do_fork(&parent).unwrap();
        let child = CurrentTask::adopt(lookup(child_pid).unwrap());

        parent.proc.vmmap.lock().write(vaddr, b"Y").unwrap();

        let mut b = [0u8; 1];
        child.proc.vmmap.lock().read(vaddr, &mut b).unwrap();
        assert_eq!(&b, b"X");
        parent.proc.vmmap.lock().read(vaddr, &mut b).unwrap();
        assert_eq!(&b, b"Y");
    }

    #[test]
    fn test_fork_unmaps_parent_translations() {
        let (parent, _fs) = init_task();
        let start = parent
            .proc
            .vmmap
            .lock()
            .map(
                &parent.proc.pmap,
                None,
                0,
                1,
                Prot::READ | Prot::WRITE,
                MapFlags::PRIVATE | MapFlags::ANON,
                0,
                Dir::HiLo,
            )
            .unwrap();
        parent
            .proc
            .pmap
            .map(start, 0x1000, crate::vm::pmap::PtFlags::PRESENT);
        assert_eq!(parent.proc.pmap.mapped_count(), 1);

        do_fork(&parent).unwrap();
        assert_eq!(parent.proc.pmap.mapped_count(), 0);
        assert!(parent.proc.pmap.tlb_flush_count() > 0);
    }

    #[test]
    fn test_fork_shares_files_and_cwd() {
        let (parent, _fs) = init_task();
        let file = crate::fs::file::File::new(
            parent.proc.cwd.lock().clone(),
            crate::fs::file::FMode::READ,
        );
        parent.proc.files.lock().set(0, Arc::clone(&file));

        let child_pid = do_fork(&parent).unwrap();
        let child = lookup(child_pid).unwrap();

        assert!(Arc::ptr_eq(&child.files.lock().get(0).unwrap(), &file));
        assert!(Arc::ptr_eq(
            &child.cwd.lock().clone(),
            &parent.proc.cwd.lock().clone()
        ));
    }

    #[test]
    fn test_waitpid_reaps_exited_child() {
        let (parent, _fs) = init_task();
        let child_pid = do_fork(&parent).unwrap();
        let child = CurrentTask::adopt(lookup(child_pid).unwrap());

        do_exit(&child, 3);
        let (pid, status) = do_waitpid(&parent, None).unwrap();
        assert_eq!(pid, child_pid);
        assert_eq!(status, 3);

        // Reaped: gone from the table, nothing left to wait for.
        assert!(lookup(child_pid).is_none());
        assert_eq!(do_waitpid(&parent, None), Err(Errno::ECHILD));
    }

    #[test]
    fn test_waitpid_specific_child() {
        let (parent, _fs) = init_task();
        let a = do_fork(&parent).unwrap();
        let b = do_fork(&parent).unwrap();

        do_exit(&CurrentTask::adopt(lookup(b).unwrap()), 7);
        assert_eq!(do_waitpid(&parent, Some(b)), Ok((b, 7)));

        do_exit(&CurrentTask::adopt(lookup(a).unwrap()), 9);
        assert_eq!(do_waitpid(&parent, Some(a)), Ok((a, 9)));

        assert_eq!(do_waitpid(&parent, Some(Pid(99999))), Err(Errno::ECHILD));
    }

    #[test]
    fn test_waitpid_without_children() {
        let (task, _fs) = init_task();
        assert_eq!(do_waitpid(&task, None), Err(Errno::ECHILD));
    }

    #[test]
    fn test_waitpid_blocks_until_exit() {
        let (parent, _fs) = init_task();
        let child_pid = do_fork(&parent).unwrap();
        let child = CurrentTask::adopt(lookup(child_pid).unwrap());

        let waiter = {
            let parent = parent.clone();
            std::thread::spawn(move || do_waitpid(&parent, None))
        };
        while parent.proc.child_exit_queue.waiter_count() == 0 {
            std::thread::yield_now();
        }

        do_exit(&child, 11);
        assert_eq!(waiter.join().unwrap(), Ok((child_pid, 11)));
    }

    #[test]
    fn test_exit_collapses_parent_chains() {
        let (parent, _fs) = init_task();
        let start = parent
            .proc
            .vmmap
            .lock()
            .map(
                &parent.proc.pmap,
                None,
                0,
                1,
                Prot::READ | Prot::WRITE,
                MapFlags::PRIVATE | MapFlags::ANON,
                0,
                Dir::HiLo,
            )
            .unwrap();
        parent
            .proc
            .vmmap
            .lock()
            .write(pn_to_addr(start), &[9u8; PAGE_SIZE / 4])
            .unwrap();

        let child_pid = do_fork(&parent).unwrap();
        do_exit(&CurrentTask::adopt(lookup(child_pid).unwrap()), 0);

        // The parent's chain shrank back to shadow over bottom.
        let map = parent.proc.vmmap.lock();
        let mobj = &map.lookup(start).unwrap().mobj;
        assert_ne!(
            mobj.shadowed().unwrap().mtype(),
            crate::vm::mobj::MobjType::Shadow
        );
    }
}
