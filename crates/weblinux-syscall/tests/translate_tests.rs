//! Translator integration tests.
//!
//! Each test wires a Vec-backed user memory and kernel memory through the
//! translator with a scripted kernel entry, the same seam the Worker-side
//! runner drives against real Wasm memories.

use weblinux_syscall::{
    lookup, nr, sizes, translate, MemorySpace, ScratchRegion, TranslateError, Translator,
    VecSpace, MAX_ARGS,
};

const SCRATCH_BASE: u32 = 0x10000;
const SCRATCH_SIZE: u32 = 0x1000;

fn fixture() -> (VecSpace, VecSpace, Translator) {
    let kernel = VecSpace::new(0x20000);
    let user = VecSpace::new(0x8000);
    let tr = Translator::new(SCRATCH_BASE, SCRATCH_SIZE);
    (kernel, user, tr)
}

fn args(vals: &[i32]) -> [i32; MAX_ARGS] {
    let mut out = [0i32; MAX_ARGS];
    out[..vals.len()].copy_from_slice(vals);
    out
}

#[test]
fn openat_stages_path_at_scratch_start() {
    let (mut kernel, mut user, mut tr) = fixture();
    user.fill_at(0x2000, b"/hello\0").unwrap();

    let mut seen = None;
    let ret = tr.run(
        nr::OPENAT,
        &mut args(&[-100, 0x2000, 0, 0]),
        Some(&mut user),
        &mut kernel,
        |kernel, a| {
            // The kernel must see the scratch copy, not the user address.
            let mut staged = [0u8; 7];
            kernel.read(a[1] as u32, &mut staged).unwrap();
            assert_eq!(&staged, b"/hello\0");
            seen = Some(*a);
            3
        },
    );

    assert_eq!(ret, 3);
    let seen = seen.expect("kernel entry ran");
    assert_eq!(seen[0], -100);
    assert_eq!(seen[1] as u32, SCRATCH_BASE, "first allocation sits at offset 0");
}

#[test]
fn read_copies_back_exactly_return_value_bytes() {
    let (mut kernel, mut user, mut tr) = fixture();
    user.fill_at(0x1000, &[0xAA; 16]).unwrap();

    let ret = tr.run(
        nr::READ,
        &mut args(&[3, 0x1000, 8]),
        Some(&mut user),
        &mut kernel,
        |kernel, a| {
            kernel.write(a[1] as u32, b"abcdefgh").unwrap();
            5
        },
    );

    assert_eq!(ret, 5);
    let mut buf = [0u8; 8];
    user.read(0x1000, &mut buf).unwrap();
    // Exactly 5 bytes written; the tail keeps its prior contents.
    assert_eq!(&buf[..5], b"abcde");
    assert_eq!(&buf[5..], &[0xAA; 3]);
}

#[test]
fn read_error_return_copies_nothing() {
    let (mut kernel, mut user, mut tr) = fixture();
    user.fill_at(0x1000, &[0x55; 8]).unwrap();

    let ret = tr.run(
        nr::READ,
        &mut args(&[3, 0x1000, 8]),
        Some(&mut user),
        &mut kernel,
        |kernel, a| {
            kernel.write(a[1] as u32, b"junkjunk").unwrap();
            -9
        },
    );

    assert_eq!(ret, -9);
    let mut buf = [0u8; 8];
    user.read(0x1000, &mut buf).unwrap();
    assert_eq!(&buf, &[0x55; 8]);
}

#[test]
fn write_stages_user_bytes_before_entry() {
    let (mut kernel, mut user, mut tr) = fixture();
    user.fill_at(0x3000, b"payload!").unwrap();

    let ret = tr.run(
        nr::WRITE,
        &mut args(&[1, 0x3000, 8]),
        Some(&mut user),
        &mut kernel,
        |kernel, a| {
            let mut staged = [0u8; 8];
            kernel.read(a[1] as u32, &mut staged).unwrap();
            assert_eq!(&staged, b"payload!");
            8
        },
    );
    assert_eq!(ret, 8);
}

#[test]
fn readv_scatter_obeys_return_value() {
    let (mut kernel, mut user, mut tr) = fixture();
    // Two iovecs: {base 0x1000, len 4}, {base 0x1100, len 2}.
    let iov = 0x4000u32;
    user.write_u32(iov, 0x1000).unwrap();
    user.write_u32(iov + 4, 4).unwrap();
    user.write_u32(iov + 8, 0x1100).unwrap();
    user.write_u32(iov + 12, 2).unwrap();
    user.fill_at(0x1100, &[0xEE; 4]).unwrap();

    let ret = tr.run(
        nr::READV,
        &mut args(&[3, iov as i32, 2]),
        Some(&mut user),
        &mut kernel,
        |kernel, a| {
            // The staged iovec array points at scratch buffers.
            let karr = a[1] as u32;
            let b0 = kernel.read_u32(karr).unwrap();
            let l0 = kernel.read_u32(karr + 4).unwrap();
            let b1 = kernel.read_u32(karr + 8).unwrap();
            let l1 = kernel.read_u32(karr + 12).unwrap();
            assert_eq!((l0, l1), (4, 2));
            assert!(b0 >= SCRATCH_BASE && b1 >= SCRATCH_BASE);
            kernel.write(b0, b"WXYZ").unwrap();
            kernel.write(b1, b"AB").unwrap();
            5
        },
    );

    assert_eq!(ret, 5);
    let mut first = [0u8; 4];
    user.read(0x1000, &mut first).unwrap();
    assert_eq!(&first, b"WXYZ");
    let mut second = [0u8; 4];
    user.read(0x1100, &mut second).unwrap();
    // 5th byte lands in the second buffer; the 6th is never written.
    assert_eq!(second[0], b'A');
    assert_eq!(&second[1..], &[0xEE; 3]);
}

#[test]
fn writev_gathers_user_buffers() {
    let (mut kernel, mut user, mut tr) = fixture();
    let iov = 0x4000u32;
    user.write_u32(iov, 0x1000).unwrap();
    user.write_u32(iov + 4, 3).unwrap();
    user.write_u32(iov + 8, 0x2000).unwrap();
    user.write_u32(iov + 12, 3).unwrap();
    user.fill_at(0x1000, b"foo").unwrap();
    user.fill_at(0x2000, b"bar").unwrap();

    let ret = tr.run(
        nr::WRITEV,
        &mut args(&[1, iov as i32, 2]),
        Some(&mut user),
        &mut kernel,
        |kernel, a| {
            let karr = a[1] as u32;
            let mut total = Vec::new();
            for i in 0..2u32 {
                let base = kernel.read_u32(karr + 8 * i).unwrap();
                let len = kernel.read_u32(karr + 8 * i + 4).unwrap();
                let mut buf = vec![0u8; len as usize];
                kernel.read(base, &mut buf).unwrap();
                total.extend_from_slice(&buf);
            }
            assert_eq!(&total, b"foobar");
            6
        },
    );
    assert_eq!(ret, 6);
}

#[test]
fn fixed_size_output_copies_declared_length() {
    let (mut kernel, mut user, mut tr) = fixture();

    let ret = tr.run(
        nr::CLOCK_GETTIME,
        &mut args(&[1, 0x2000]),
        Some(&mut user),
        &mut kernel,
        |kernel, a| {
            let mut ts = vec![0u8; sizes::TIMESPEC as usize];
            ts[0] = 0x2A;
            ts[8] = 0x07;
            kernel.write(a[1] as u32, &ts).unwrap();
            0
        },
    );

    assert_eq!(ret, 0);
    let mut ts = vec![0u8; sizes::TIMESPEC as usize];
    user.read(0x2000, &mut ts).unwrap();
    assert_eq!(ts[0], 0x2A);
    assert_eq!(ts[8], 0x07);
}

#[test]
fn null_user_pointer_stays_null() {
    let (mut kernel, mut user, mut tr) = fixture();

    let ret = tr.run(
        nr::RT_SIGACTION,
        &mut args(&[9, 0, 0]),
        Some(&mut user),
        &mut kernel,
        |_, a| {
            assert_eq!(a[1], 0);
            assert_eq!(a[2], 0);
            0
        },
    );
    assert_eq!(ret, 0);
}

#[test]
fn zero_length_copy_leaves_scratch_untouched() {
    let (mut kernel, mut user, mut tr) = fixture();

    let ret = tr.run(
        nr::READ,
        &mut args(&[3, 0x1000, 0]),
        Some(&mut user),
        &mut kernel,
        |_, _| 0,
    );
    assert_eq!(ret, 0);
    assert_eq!(tr.scratch().used(), 0);
}

#[test]
fn unterminated_string_fails_with_efault() {
    let (mut kernel, mut user, mut tr) = fixture();
    // No terminator anywhere the budget allows.
    let junk = vec![b'x'; user.size() as usize - 0x2000];
    user.fill_at(0x2000, &junk).unwrap();

    let mut entered = false;
    let ret = tr.run(
        nr::OPENAT,
        &mut args(&[-100, 0x2000, 0, 0]),
        Some(&mut user),
        &mut kernel,
        |_, _| {
            entered = true;
            0
        },
    );
    assert_eq!(ret, -14);
    assert!(!entered, "kernel entry must not run on a failed copy-in");
}

#[test]
fn scratch_overflow_is_distinguished() {
    let (mut kernel, mut user, mut tr) = fixture();

    let mut entered = false;
    let ret = tr.run(
        nr::READ,
        &mut args(&[3, 0x1000, (SCRATCH_SIZE + 1) as i32]),
        Some(&mut user),
        &mut kernel,
        |_, _| {
            entered = true;
            0
        },
    );
    assert_eq!(ret, -12);
    assert!(!entered);
}

#[test]
fn undescribed_syscall_passes_through() {
    let (mut kernel, mut user, mut tr) = fixture();

    let ret = tr.run(
        nr::CLOSE,
        &mut args(&[7]),
        Some(&mut user),
        &mut kernel,
        |_, a| {
            assert_eq!(a[0], 7);
            0
        },
    );
    assert_eq!(ret, 0);
    assert_eq!(tr.scratch().used(), 0);
}

#[test]
fn kernel_only_task_passes_pointers_unchanged() {
    let (mut kernel, _user, mut tr) = fixture();

    let ret = tr.run(
        nr::OPENAT,
        &mut args(&[-100, 0x2000, 0, 0]),
        None::<&mut VecSpace>,
        &mut kernel,
        |_, a| {
            assert_eq!(a[1], 0x2000);
            4
        },
    );
    assert_eq!(ret, 4);
}

#[test]
fn execve_stages_argv_with_null_terminator() {
    let (mut kernel, mut user, mut tr) = fixture();
    user.fill_at(0x100, b"/bin/sh\0").unwrap();
    user.fill_at(0x200, b"sh\0").unwrap();
    user.fill_at(0x210, b"-c\0").unwrap();
    // argv = ["sh", "-c", NULL] at 0x300; envp = NULL list at 0x400.
    user.write_u32(0x300, 0x200).unwrap();
    user.write_u32(0x304, 0x210).unwrap();
    user.write_u32(0x308, 0).unwrap();
    user.write_u32(0x400, 0).unwrap();

    let ret = tr.run(
        nr::EXECVE,
        &mut args(&[0x100, 0x300, 0x400]),
        Some(&mut user),
        &mut kernel,
        |kernel, a| {
            let mut path = [0u8; 8];
            kernel.read(a[0] as u32, &mut path).unwrap();
            assert_eq!(&path, b"/bin/sh\0");

            let argv = a[1] as u32;
            let a0 = kernel.read_u32(argv).unwrap();
            let a1 = kernel.read_u32(argv + 4).unwrap();
            let a2 = kernel.read_u32(argv + 8).unwrap();
            assert!(a0 >= SCRATCH_BASE && a1 >= SCRATCH_BASE);
            assert_eq!(a2, 0);

            let mut arg0 = [0u8; 3];
            kernel.read(a0, &mut arg0).unwrap();
            assert_eq!(&arg0, b"sh\0");

            let envp = a[2] as u32;
            assert_eq!(kernel.read_u32(envp).unwrap(), 0);
            0
        },
    );
    assert_eq!(ret, 0);
}

#[test]
fn copy_in_image_matches_user_bytes() {
    // Descriptor invariant: for an input pointer the staged bytes equal
    // the user bytes at the moment of entry.
    let desc = lookup(nr::WRITE).unwrap();
    let mut kernel = VecSpace::new(0x20000);
    let mut user = VecSpace::new(0x8000);
    let mut scratch = ScratchRegion::new(SCRATCH_BASE, SCRATCH_SIZE);
    let payload: Vec<u8> = (0u8..=255).collect();
    user.fill_at(0x500, &payload).unwrap();

    let mut a = args(&[1, 0x500, 256]);
    let ret = translate(desc, &mut a, &mut user, &mut kernel, &mut scratch, |k, a| {
        let mut staged = vec![0u8; 256];
        k.read(a[1] as u32, &mut staged).unwrap();
        assert_eq!(staged, (0u8..=255).collect::<Vec<u8>>());
        256
    })
    .unwrap();
    assert_eq!(ret, 256);
}

#[test]
fn allocations_inside_one_syscall_stay_aligned_and_bounded() {
    let (mut kernel, mut user, mut tr) = fixture();
    user.fill_at(0x100, b"/tmp/a\0").unwrap();

    tr.run(
        nr::NEWFSTATAT,
        &mut args(&[-100, 0x100, 0x2000, 0]),
        Some(&mut user),
        &mut kernel,
        |_, a| {
            assert_eq!(a[1] as u32 % 8, 0);
            assert_eq!(a[2] as u32 % 8, 0);
            0
        },
    );
    assert!(tr.scratch().used() <= SCRATCH_SIZE);
}

#[test]
fn oversized_iovec_count_is_rejected() {
    let (mut kernel, mut user, mut tr) = fixture();
    let err = {
        let desc = lookup(nr::READV).unwrap();
        let mut scratch = ScratchRegion::new(SCRATCH_BASE, SCRATCH_SIZE);
        let mut a = args(&[3, 0x4000, 4096]);
        translate(desc, &mut a, &mut user, &mut kernel, &mut scratch, |_, _| 0).unwrap_err()
    };
    assert!(matches!(err, TranslateError::TooManyVectors { .. }));
    assert_eq!(err.errno_return(), -22);
    // And through the boundary it surfaces as the errno, not a panic.
    let ret = tr.run(
        nr::READV,
        &mut args(&[3, 0x4000, 4096]),
        Some(&mut user),
        &mut kernel,
        |_, _| 0,
    );
    assert_eq!(ret, -22);
}
