mod refresh_on_401;
