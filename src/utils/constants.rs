/// Blob con la colección local (Local Mirror)
pub const MIRROR_KEY: &str = "mirror";

/// Blob con la queue de operaciones pendientes
pub const QUEUE_KEY: &str = "queue";

/// Credencial bearer que deja el subsistema de autenticación
pub const TOKEN_KEY: &str = "token";

/// Versión del formato persistido de mirror y queue
pub const STORAGE_FORMAT_VERSION: u32 = 1;

/// Pases fallidos seguidos a partir de los que se avisa de la réplica atascada
pub const STALLED_PASS_WARNING: u32 = 5;
