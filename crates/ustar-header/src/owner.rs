//! Owner and group name lookup for header uname/gname fields.

use std::ffi::CStr;

fn initial_buf_size(sysconf_name: libc::c_int, fallback: usize) -> usize {
    // SAFETY: sysconf has no preconditions.
    let n = unsafe { libc::sysconf(sysconf_name) };
    if n > 0 {
        n as usize
    } else {
        fallback
    }
}

/// Resolve a uid to its user name, or an empty name if there is none.
pub(crate) fn user_name(uid: u32) -> Vec<u8> {
    let mut buf = vec![0u8; initial_buf_size(libc::_SC_GETPW_R_SIZE_MAX, 2048)];
    loop {
        // SAFETY: zeroed passwd is a valid out-parameter for getpwuid_r.
        let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::passwd = std::ptr::null_mut();

        // SAFETY: all pointers are valid for the duration of the call and
        // buf.len() is the real size of buf.
        let rc = unsafe {
            libc::getpwuid_r(
                uid,
                &mut pwd,
                buf.as_mut_ptr().cast::<libc::c_char>(),
                buf.len(),
                &mut result,
            )
        };
        match rc {
            0 if result.is_null() => return Vec::new(),
            // SAFETY: on success pw_name points into buf and is NUL-terminated.
            0 => return unsafe { CStr::from_ptr(pwd.pw_name) }.to_bytes().to_vec(),
            libc::ERANGE => buf.resize(buf.len() * 2, 0),
            _ => return Vec::new(),
        }
    }
}

/// Resolve a gid to its group name, or an empty name if there is none.
pub(crate) fn group_name(gid: u32) -> Vec<u8> {
    let mut buf = vec![0u8; initial_buf_size(libc::_SC_GETGR_R_SIZE_MAX, 2048)];
    loop {
        // SAFETY: zeroed group is a valid out-parameter for getgrgid_r.
        let mut grp: libc::group = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::group = std::ptr::null_mut();

        // SAFETY: as for getpwuid_r above.
        let rc = unsafe {
            libc::getgrgid_r(
                gid,
                &mut grp,
                buf.as_mut_ptr().cast::<libc::c_char>(),
                buf.len(),
                &mut result,
            )
        };
        match rc {
            0 if result.is_null() => return Vec::new(),
            // SAFETY: on success gr_name points into buf and is NUL-terminated.
            0 => return unsafe { CStr::from_ptr(grp.gr_name) }.to_bytes().to_vec(),
            libc::ERANGE => buf.resize(buf.len() * 2, 0),
            _ => return Vec::new(),
        }
    }
}
