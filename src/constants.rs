macro_rules! def_constants {
    ( $name:ident, $ty:ty, $val:literal ) => {
        pub(crate) const $name: $ty = $val;
    };
}

// client to server
def_constants!(SSH_FXP_EXTENDED, u8, 200);

// server to client
def_constants!(SSH_FXP_STATUS, u8, 101);
def_constants!(SSH_FXP_EXTENDED_REPLY, u8, 201);

// status messages
def_constants!(SSH_FX_OK, u32, 0);
